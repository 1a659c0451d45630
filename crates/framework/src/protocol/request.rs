#![forbid(unsafe_code)]

use crate::buffer::FrameBuffer;
use crate::error::Error;
use crate::transport::SockId;
use crate::wire::{self, Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    ContentScreening = 0,
    WebProtection = 1,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::ContentScreening, EngineKind::WebProtection];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentScreening => "content-screening",
            Self::WebProtection => "web-protection",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Encode for EngineKind {
    fn encode(&self, out: &mut FrameBuffer) {
        (*self as u32).encode(out);
    }
}

impl Decode for EngineKind {
    fn decode(buf: &mut FrameBuffer) -> Result<Self, Error> {
        match u32::decode(buf)? {
            0 => Ok(Self::ContentScreening),
            1 => Ok(Self::WebProtection),
            other => Err(Error::Protocol(format!("unknown engine kind {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ScanData = 1,
    ScanFiles = 2,
    CheckUrls = 3,
    Cancel = 4,
    EngineInfo = 16,
    EngineOpen = 17,
    EngineClose = 18,
    EngineSetEnabled = 19,
}

impl Command {
    /// Whether a connection on `sock` may issue this command.
    pub fn is_served_by(self, sock: SockId) -> bool {
        match self {
            Self::ScanData | Self::ScanFiles => sock == SockId::ContentScreening,
            Self::CheckUrls => sock == SockId::WebProtection,
            Self::Cancel => matches!(sock, SockId::ContentScreening | SockId::WebProtection),
            Self::EngineInfo | Self::EngineOpen | Self::EngineClose | Self::EngineSetEnabled => {
                sock == SockId::Admin
            }
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Error> {
        Ok(match value {
            1 => Self::ScanData,
            2 => Self::ScanFiles,
            3 => Self::CheckUrls,
            4 => Self::Cancel,
            16 => Self::EngineInfo,
            17 => Self::EngineOpen,
            18 => Self::EngineClose,
            19 => Self::EngineSetEnabled,
            other => return Err(Error::Protocol(format!("unknown command {other}"))),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ScanData(Vec<u8>),
    ScanFiles(Vec<String>),
    CheckUrls(Vec<String>),
    Cancel(u64),
    EngineInfo(EngineKind),
    EngineOpen(EngineKind),
    EngineClose(EngineKind),
    EngineSetEnabled { kind: EngineKind, enabled: bool },
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Self::ScanData(_) => Command::ScanData,
            Self::ScanFiles(_) => Command::ScanFiles,
            Self::CheckUrls(_) => Command::CheckUrls,
            Self::Cancel(_) => Command::Cancel,
            Self::EngineInfo(_) => Command::EngineInfo,
            Self::EngineOpen(_) => Command::EngineOpen,
            Self::EngineClose(_) => Command::EngineClose,
            Self::EngineSetEnabled { .. } => Command::EngineSetEnabled,
        }
    }

    /// Consuming encode: scan payloads are moved into the frame, not copied.
    pub fn into_payload(self) -> FrameBuffer {
        let mut out = FrameBuffer::new();
        (self.command() as u32).encode(&mut out);
        match self {
            Self::ScanData(data) => wire::put_owned_bytes(&mut out, data),
            Self::ScanFiles(items) | Self::CheckUrls(items) => items.encode(&mut out),
            Self::Cancel(task) => task.encode(&mut out),
            Self::EngineInfo(kind) | Self::EngineOpen(kind) | Self::EngineClose(kind) => {
                kind.encode(&mut out)
            }
            Self::EngineSetEnabled { kind, enabled } => {
                kind.encode(&mut out);
                enabled.encode(&mut out);
            }
        }
        out
    }

    pub fn decode(mut frame: FrameBuffer) -> Result<Self, Error> {
        let buf = &mut frame;
        let request = match Command::try_from(u32::decode(buf)?)? {
            Command::ScanData => Self::ScanData(wire::get_bytes(buf)?),
            Command::ScanFiles => Self::ScanFiles(Vec::decode(buf)?),
            Command::CheckUrls => Self::CheckUrls(Vec::decode(buf)?),
            Command::Cancel => Self::Cancel(u64::decode(buf)?),
            Command::EngineInfo => Self::EngineInfo(EngineKind::decode(buf)?),
            Command::EngineOpen => Self::EngineOpen(EngineKind::decode(buf)?),
            Command::EngineClose => Self::EngineClose(EngineKind::decode(buf)?),
            Command::EngineSetEnabled => Self::EngineSetEnabled {
                kind: EngineKind::decode(buf)?,
                enabled: bool::decode(buf)?,
            },
        };
        wire::expect_end(buf)?;
        Ok(request)
    }
}
