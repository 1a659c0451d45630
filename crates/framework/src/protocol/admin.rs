#![forbid(unsafe_code)]

use super::{Header, NO_TASK};
use crate::buffer::FrameBuffer;
use crate::error::{Error, code};
use crate::wire::{self, Decode, Encode};

/// Engine metadata as reported to admin clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineInfo {
    pub api_version: String,
    pub vendor: String,
    pub name: String,
    pub version: String,
    pub data_version: String,
    pub logo: Vec<u8>,
    pub activated: bool,
    pub enabled: bool,
    /// Seconds since the unix epoch of the last signature update.
    pub last_update: i64,
}

impl Encode for EngineInfo {
    fn encode(&self, out: &mut FrameBuffer) {
        self.api_version.encode(out);
        self.vendor.encode(out);
        self.name.encode(out);
        self.version.encode(out);
        self.data_version.encode(out);
        wire::put_bytes(out, &self.logo);
        self.activated.encode(out);
        self.enabled.encode(out);
        self.last_update.encode(out);
    }
}

impl Decode for EngineInfo {
    fn decode(buf: &mut FrameBuffer) -> Result<Self, Error> {
        Ok(Self {
            api_version: String::decode(buf)?,
            vendor: String::decode(buf)?,
            name: String::decode(buf)?,
            version: String::decode(buf)?,
            data_version: String::decode(buf)?,
            logo: wire::get_bytes(buf)?,
            activated: bool::decode(buf)?,
            enabled: bool::decode(buf)?,
            last_update: i64::decode(buf)?,
        })
    }
}

/// Answer to an admin command: status zero plus optional engine info.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminReply {
    pub info: Option<EngineInfo>,
}

impl AdminReply {
    pub fn encode(&self) -> FrameBuffer {
        let mut out = FrameBuffer::new();
        Header {
            code: code::NONE,
            task: NO_TASK,
        }
        .write(&mut out);
        self.info.encode(&mut out);
        out
    }

    /// Decode a reply, turning a negative status into the matching error.
    pub fn decode(mut frame: FrameBuffer) -> Result<Self, Error> {
        let header = Header::read(&mut frame)?;
        match header.code {
            code::NONE => {
                let info = Option::decode(&mut frame)?;
                wire::expect_end(&frame)?;
                Ok(Self { info })
            }
            status if status < 0 => Err(Error::from_code(status)),
            other => Err(Error::Protocol(format!("unexpected admin status {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::error_reply;
    use pretty_assertions::assert_eq;

    #[test]
    fn reply_with_info_decodes_back() {
        let reply = AdminReply {
            info: Some(EngineInfo {
                api_version: "CSRE_CS_API_1.0".into(),
                vendor: "Example".into(),
                name: "scanner".into(),
                version: "2.1".into(),
                data_version: "2026.10".into(),
                logo: vec![0x89, b'P', b'N', b'G'],
                activated: true,
                enabled: true,
                last_update: 1_760_000_000,
            }),
        };
        assert_eq!(AdminReply::decode(reply.encode()).unwrap(), reply);
    }

    #[test]
    fn negative_status_becomes_the_error() {
        let frame = error_reply(NO_TASK, &Error::PermissionDenied);
        assert!(matches!(
            AdminReply::decode(frame),
            Err(Error::PermissionDenied)
        ));
    }
}
