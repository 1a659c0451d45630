#![forbid(unsafe_code)]

use super::{Detection, Header};
use crate::buffer::FrameBuffer;
use crate::error::Error;
use crate::wire::{self, Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    Start = 1,
    Complete = 2,
    Cancel = 3,
    NoMalware = 4,
    MalwareDetected = 5,
}

impl TryFrom<i32> for EventCode {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self, Error> {
        match value {
            1 => Ok(Self::Start),
            2 => Ok(Self::Complete),
            3 => Ok(Self::Cancel),
            4 => Ok(Self::NoMalware),
            5 => Ok(Self::MalwareDetected),
            other => Err(Error::Protocol(format!("unknown event code {other}"))),
        }
    }
}

/// Final verdict carried by a COMPLETE event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    NoMalware,
    MalwareDetected,
}

impl Verdict {
    pub fn from_count(detections: usize) -> Self {
        if detections == 0 {
            Self::NoMalware
        } else {
            Self::MalwareDetected
        }
    }

    fn code(self) -> EventCode {
        match self {
            Self::NoMalware => EventCode::NoMalware,
            Self::MalwareDetected => EventCode::MalwareDetected,
        }
    }
}

/// One step of a task's lifecycle as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started {
        task: u64,
    },
    Detected {
        task: u64,
        detection: Detection,
    },
    Completed {
        task: u64,
        verdict: Verdict,
        detections: u32,
    },
    Cancelled {
        task: u64,
    },
    Failed {
        task: u64,
        code: i32,
    },
}

impl Event {
    pub fn task(&self) -> u64 {
        match self {
            Self::Started { task }
            | Self::Detected { task, .. }
            | Self::Completed { task, .. }
            | Self::Cancelled { task }
            | Self::Failed { task, .. } => *task,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }

    pub fn encode(&self) -> FrameBuffer {
        let mut out = FrameBuffer::new();
        let task = self.task();
        match self {
            Self::Started { .. } => header(EventCode::Start as i32, task, &mut out),
            Self::Detected { detection, .. } => {
                header(EventCode::MalwareDetected as i32, task, &mut out);
                detection.encode(&mut out);
            }
            Self::Completed {
                verdict,
                detections,
                ..
            } => {
                header(EventCode::Complete as i32, task, &mut out);
                (verdict.code() as i32).encode(&mut out);
                detections.encode(&mut out);
            }
            Self::Cancelled { .. } => header(EventCode::Cancel as i32, task, &mut out),
            Self::Failed { code, .. } => header(*code, task, &mut out),
        }
        out
    }

    pub fn decode(mut frame: FrameBuffer) -> Result<Self, Error> {
        let buf = &mut frame;
        let Header { code, task } = Header::read(buf)?;
        if code < 0 {
            wire::expect_end(buf)?;
            return Ok(Self::Failed { task, code });
        }
        let event = match EventCode::try_from(code)? {
            EventCode::Start => Self::Started { task },
            EventCode::MalwareDetected => Self::Detected {
                task,
                detection: Detection::decode(buf)?,
            },
            EventCode::Complete => {
                let verdict = match EventCode::try_from(i32::decode(buf)?)? {
                    EventCode::NoMalware => Verdict::NoMalware,
                    EventCode::MalwareDetected => Verdict::MalwareDetected,
                    other => {
                        return Err(Error::Protocol(format!("{other:?} is not a verdict")));
                    }
                };
                Self::Completed {
                    task,
                    verdict,
                    detections: u32::decode(buf)?,
                }
            }
            EventCode::Cancel => Self::Cancelled { task },
            EventCode::NoMalware => {
                return Err(Error::Protocol("verdict sent outside COMPLETE".into()));
            }
        };
        wire::expect_end(buf)?;
        Ok(event)
    }
}

fn header(code: i32, task: u64, out: &mut FrameBuffer) {
    Header { code, task }.write(out);
}
