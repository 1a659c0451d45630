#![forbid(unsafe_code)]

use super::Event;
use crate::error::Error;

/// Lifecycle of a task. Each task sees at most one terminal transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TaskState {
    #[default]
    Idle,
    Started,
    Completed,
    Cancelled,
    Failed(i32),
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed(_))
    }

    /// Apply `event`, rejecting transitions the lifecycle does not allow.
    pub fn advance(&mut self, event: &Event) -> Result<(), Error> {
        let next = match (*self, event) {
            (Self::Idle, Event::Started { .. }) => Self::Started,
            (Self::Started, Event::Detected { .. }) => Self::Started,
            (Self::Started, Event::Completed { .. }) => Self::Completed,
            (Self::Started, Event::Cancelled { .. }) => Self::Cancelled,
            (Self::Idle | Self::Started, Event::Failed { code, .. }) => Self::Failed(*code),
            (state, event) => {
                return Err(Error::Protocol(format!(
                    "{event:?} not allowed in state {state:?}"
                )));
            }
        };
        *self = next;
        Ok(())
    }
}
