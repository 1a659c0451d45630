#![forbid(unsafe_code)]

//! Framework error taxonomy and its wire codes.
//!
//! Codes are negative and module tagged: `-((module << 24) | n)`. Module 0
//! only holds [`code::NOT_IMPLEMENTED`], the answer for every call that needs
//! an engine when no usable engine library is loaded.

/// Build a module tagged error code.
pub const fn tagged(module: i32, n: i32) -> i32 {
    -((module << 24) | n)
}

pub const MODULE_GENERIC: i32 = 0;
pub const MODULE_FRAMEWORK: i32 = 1;
pub const MODULE_ENGINE: i32 = 2;

pub mod code {
    use super::{MODULE_ENGINE, MODULE_FRAMEWORK, MODULE_GENERIC, tagged};

    pub const NONE: i32 = 0;

    pub const NOT_IMPLEMENTED: i32 = tagged(MODULE_GENERIC, 0x01);

    pub const INVALID_PARAMETER: i32 = tagged(MODULE_FRAMEWORK, 0x01);
    pub const OUT_OF_MEMORY: i32 = tagged(MODULE_FRAMEWORK, 0x02);
    pub const PERMISSION_DENIED: i32 = tagged(MODULE_FRAMEWORK, 0x03);
    pub const SOCKET: i32 = tagged(MODULE_FRAMEWORK, 0x04);
    pub const PROTOCOL: i32 = tagged(MODULE_FRAMEWORK, 0x05);
    pub const FILE_DO_NOT_EXIST: i32 = tagged(MODULE_FRAMEWORK, 0x06);
    pub const BUSY: i32 = tagged(MODULE_FRAMEWORK, 0x07);
    pub const SERVER: i32 = tagged(MODULE_FRAMEWORK, 0x08);
    pub const CANCELLED: i32 = tagged(MODULE_FRAMEWORK, 0x09);

    pub const ENGINE_NOT_ACTIVATED: i32 = tagged(MODULE_ENGINE, 0x01);
    pub const ENGINE_DISABLED: i32 = tagged(MODULE_ENGINE, 0x02);
    pub const ENGINE_INTERNAL: i32 = tagged(MODULE_ENGINE, 0x03);
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Frame truncated: {requested} bytes requested, {available} available")]
    Framing { requested: usize, available: usize },

    #[error("Frame of {size} bytes exceeds the {limit} byte limit")]
    FrameTooLarge { size: u32, limit: u32 },

    #[error("Malformed message: {0}")]
    Protocol(String),

    #[error("Peer disconnected")]
    Disconnected,

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Sys(#[from] nix::Error),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Out of memory")]
    OutOfMemory,

    #[error("File does not exist")]
    FileNotFound,

    #[error("Too many scans in flight")]
    Busy,

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Engine is not activated")]
    EngineNotActivated,

    #[error("Engine is disabled")]
    EngineDisabled,

    #[error(
        "Engine internal error (vendor code {vendor_code:?}): {}",
        .description.as_deref().unwrap_or("no description")
    )]
    EngineInternal {
        vendor_code: Option<i32>,
        description: Option<String>,
    },

    #[error("Daemon replied with error code {0:#x}")]
    Remote(i32),
}

impl Error {
    /// The code this error is reported with on the wire.
    pub fn code(&self) -> i32 {
        match self {
            Self::Framing { .. } | Self::FrameTooLarge { .. } | Self::Protocol(_) => code::PROTOCOL,
            Self::Disconnected | Self::Io(_) | Self::Sys(_) => code::SOCKET,
            Self::NotImplemented(_) => code::NOT_IMPLEMENTED,
            Self::InvalidParameter(_) => code::INVALID_PARAMETER,
            Self::PermissionDenied => code::PERMISSION_DENIED,
            Self::OutOfMemory => code::OUT_OF_MEMORY,
            Self::FileNotFound => code::FILE_DO_NOT_EXIST,
            Self::Busy => code::BUSY,
            Self::Cancelled => code::CANCELLED,
            Self::EngineNotActivated => code::ENGINE_NOT_ACTIVATED,
            Self::EngineDisabled => code::ENGINE_DISABLED,
            Self::EngineInternal { .. } => code::ENGINE_INTERNAL,
            Self::Remote(code) => *code,
        }
    }

    /// Rebuild an error from a code received over the wire.
    ///
    /// Vendor details never cross the wire, so an engine internal error comes
    /// back without them.
    pub fn from_code(value: i32) -> Self {
        match value {
            code::NOT_IMPLEMENTED => Self::NotImplemented("no usable engine".into()),
            code::INVALID_PARAMETER => Self::InvalidParameter("rejected by daemon".into()),
            code::OUT_OF_MEMORY => Self::OutOfMemory,
            code::PERMISSION_DENIED => Self::PermissionDenied,
            code::PROTOCOL => Self::Protocol("rejected by daemon".into()),
            code::FILE_DO_NOT_EXIST => Self::FileNotFound,
            code::BUSY => Self::Busy,
            code::CANCELLED => Self::Cancelled,
            code::ENGINE_NOT_ACTIVATED => Self::EngineNotActivated,
            code::ENGINE_DISABLED => Self::EngineDisabled,
            code::ENGINE_INTERNAL => Self::EngineInternal {
                vendor_code: None,
                description: None,
            },
            other => Self::Remote(other),
        }
    }

    /// Errors that leave the byte stream in an unknown state.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Self::Framing { .. }
                | Self::FrameTooLarge { .. }
                | Self::Protocol(_)
                | Self::Disconnected
                | Self::Io(_)
                | Self::Sys(_)
        )
    }
}
