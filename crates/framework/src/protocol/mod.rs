//! Messages exchanged between clients and the daemon.
//!
//! Requests are a `u32` command followed by its payload. Everything the
//! daemon sends starts with an `i32` code and a `u64` task id; positive codes
//! are [`EventCode`]s, zero is an admin success and negative values are
//! error codes without payload.

mod admin;
mod detection;
mod event;
mod request;
mod state;

pub use admin::{AdminReply, EngineInfo};
pub use detection::{Detection, Severity, ThreatType};
pub use event::{Event, EventCode, Verdict};
pub use request::{Command, EngineKind, Request};
pub use state::TaskState;

use crate::buffer::FrameBuffer;
use crate::error::Error;
use crate::wire::{Decode, Encode};

/// Task id carried by replies that do not belong to a task.
pub const NO_TASK: u64 = 0;

/// Leading fields of every daemon to client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub code: i32,
    pub task: u64,
}

impl Header {
    pub fn read(buf: &mut FrameBuffer) -> Result<Self, Error> {
        Ok(Self {
            code: i32::decode(buf)?,
            task: u64::decode(buf)?,
        })
    }

    pub fn write(&self, out: &mut FrameBuffer) {
        self.code.encode(out);
        self.task.encode(out);
    }
}

/// Build a payload-less error frame for `task`.
pub fn error_reply(task: u64, error: &Error) -> FrameBuffer {
    let mut out = FrameBuffer::new();
    Header {
        code: error.code(),
        task,
    }
    .write(&mut out);
    out
}
