#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to serialize TOML: {0}")]
    SerializeTOML(#[from] toml_edit::ser::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseTOML(#[from] toml_edit::TomlError),

    #[error("Failed to read configuration: {0}")]
    Deserialize(#[from] toml_edit::de::Error),

    #[error("Invalid socket mode: {0:o}")]
    InvalidSocketMode(u32),

    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),
}
