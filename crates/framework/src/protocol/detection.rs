#![forbid(unsafe_code)]

use crate::buffer::FrameBuffer;
use crate::error::Error;
use crate::wire::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low = 1,
    Medium = 2,
    High = 3,
}

impl TryFrom<i32> for Severity {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Error> {
        match value {
            1 => Ok(Self::Low),
            2 => Ok(Self::Medium),
            3 => Ok(Self::High),
            other => Err(Error::Protocol(format!("invalid severity {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreatType {
    Unknown = 0,
    Malware = 1,
    RiskyApp = 2,
    RiskyUrl = 3,
}

impl TryFrom<i32> for ThreatType {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Malware),
            2 => Ok(Self::RiskyApp),
            3 => Ok(Self::RiskyUrl),
            other => Err(Error::Protocol(format!("invalid threat type {other}"))),
        }
    }
}

/// One finding reported by an engine. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub severity: Severity,
    pub threat_type: ThreatType,
    pub malware_name: String,
    pub variant: Option<String>,
    pub detail_url: Option<String>,
    /// File path or URL the finding belongs to. Empty for buffer scans.
    pub target: Option<String>,
    /// Seconds since the unix epoch.
    pub timestamp: i64,
}

impl Encode for Detection {
    fn encode(&self, out: &mut FrameBuffer) {
        (self.severity as i32).encode(out);
        (self.threat_type as i32).encode(out);
        self.malware_name.encode(out);
        self.variant.encode(out);
        self.detail_url.encode(out);
        self.target.encode(out);
        self.timestamp.encode(out);
    }
}

impl Decode for Detection {
    fn decode(buf: &mut FrameBuffer) -> Result<Self, Error> {
        Ok(Self {
            severity: Severity::try_from(i32::decode(buf)?)?,
            threat_type: ThreatType::try_from(i32::decode(buf)?)?,
            malware_name: String::decode(buf)?,
            variant: Option::decode(buf)?,
            detail_url: Option::decode(buf)?,
            target: Option::decode(buf)?,
            timestamp: i64::decode(buf)?,
        })
    }
}
