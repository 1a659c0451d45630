#![forbid(unsafe_code)]

mod access;
mod engines;
mod error;
mod service;
mod sockets;

pub use access::Access;
pub use engines::{Engine, Engines};
pub use error::Error;
pub use service::Service;
pub use sockets::Sockets;

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Smallest frame size worth configuring: one request header plus a short
/// payload.
const MIN_FRAME_SIZE: u32 = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub sockets: Sockets,
    pub engines: Engines,
    pub service: Service,
    pub access: Access,
}

impl Config {
    /// Load configuration from a TOML file. Missing fields are filled with defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let mut config: Config = toml_edit::de::from_str(&text)?;
        config.apply_defaults()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let toml = toml_edit::ser::to_string_pretty(self)?;
        std::fs::write(path, toml)?;
        Ok(())
    }

    /// Load configuration from multiple TOML files. Later files override earlier ones.
    pub fn load_multiple<T, U>(paths: U) -> Result<Self, Error>
    where
        T: AsRef<Path>,
        U: IntoIterator<Item = T>,
    {
        let mut merged = toml_edit::DocumentMut::new();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                continue;
            }
            let text = std::fs::read_to_string(path)?;
            let doc: toml_edit::DocumentMut = text.parse()?;
            merge_document(&mut merged, doc);
        }
        let mut config: Config = toml_edit::de::from_str(&merged.to_string())?;
        config.apply_defaults()?;
        Ok(config)
    }

    fn apply_defaults(&mut self) -> Result<(), Error> {
        if self.sockets.mode & !0o777 != 0 {
            return Err(Error::InvalidSocketMode(self.sockets.mode));
        }
        self.service.max_frame_size = self.service.max_frame_size.max(MIN_FRAME_SIZE);
        self.service.max_tasks_per_connection = self.service.max_tasks_per_connection.max(1);
        for uids in self.access.grants.values_mut() {
            uids.sort_unstable();
            uids.dedup();
        }
        Ok(())
    }
}

fn merge_document(target: &mut toml_edit::DocumentMut, source: toml_edit::DocumentMut) {
    for (key, item) in source.iter() {
        merge_item(
            target.entry(key).or_insert(toml_edit::Item::None),
            item.clone(),
        );
    }
}

fn merge_item(target: &mut toml_edit::Item, source: toml_edit::Item) {
    use toml_edit::Item;
    match (target, source) {
        (Item::Table(target_table), Item::Table(source_table)) => {
            for (key, item) in source_table.iter() {
                merge_item(target_table.entry(key).or_insert(Item::None), item.clone());
            }
        }
        (Item::ArrayOfTables(target_array), Item::ArrayOfTables(source_array)) => {
            for table in source_array.iter() {
                target_array.push(table.clone());
            }
        }
        (target_item, source_item) => {
            *target_item = source_item;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.apply_defaults().unwrap();
        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(config, loaded);
    }

    #[test]
    fn load_multiple_merges() {
        let dir = tempdir().unwrap();
        let path1 = dir.path().join("a.toml");
        let path2 = dir.path().join("b.toml");

        std::fs::write(
            &path1,
            "[service]\nidle_timeout = 60\n[engines.content_screening]\nload_on_start = false\n",
        )
        .unwrap();
        std::fs::write(
            &path2,
            "[engines.content_screening]\npath = \"/opt/engine.so\"\n\
             [engines.web_protection.options]\nmode = \"strict\"\n",
        )
        .unwrap();

        let cfg = Config::load_multiple([path1, path2]).unwrap();
        assert_eq!(cfg.service.idle_timeout, Duration::from_secs(60));
        assert!(!cfg.engines.content_screening.load_on_start);
        assert_eq!(
            cfg.engines.content_screening.path,
            PathBuf::from("/opt/engine.so")
        );
        assert_eq!(
            cfg.engines.web_protection.options.get("mode").map(String::as_str),
            Some("strict")
        );
        // untouched sections keep their defaults
        assert_eq!(cfg.sockets, Sockets::default());
    }

    #[test]
    fn missing_files_are_skipped() {
        let dir = tempdir().unwrap();
        let cfg = Config::load_multiple([dir.path().join("nope.toml")]).unwrap();
        let mut expected = Config::default();
        expected.apply_defaults().unwrap();
        assert_eq!(cfg, expected);
    }

    #[test]
    fn rejects_bogus_socket_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sockets]\nmode = 0o4777\n").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(Error::InvalidSocketMode(0o4777))
        ));
    }

    #[test]
    fn grants_resolve_privileges() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[access]\nenforce = true\n[access.grants]\n\"priv.scan\" = [7, 5001, 7]\n",
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.access.grants["priv.scan"], vec![7, 5001]);
        assert!(cfg.access.is_granted("priv.scan", 5001));
        assert!(!cfg.access.is_granted("priv.scan", 5002));
        assert!(!cfg.access.is_granted("priv.admin", 5001));
        assert!(cfg.access.is_granted("priv.admin", 0));
    }

    proptest! {
        #[test]
        fn service_limits_are_clamped(frame in 0u32..1024, tasks in 0usize..4) {
            let mut config = Config::default();
            config.service.max_frame_size = frame;
            config.service.max_tasks_per_connection = tasks;
            config.apply_defaults().unwrap();
            prop_assert!(config.service.max_frame_size >= MIN_FRAME_SIZE);
            prop_assert!(config.service.max_tasks_per_connection >= 1);
        }
    }
}
