#![forbid(unsafe_code)]

//! Cross-thread wake-up for the dispatcher loop.

use crate::error::Error;
use nix::errno::Errno;
use nix::sys::eventfd::{EfdFlags, EventFd};
use std::os::fd::{AsFd, BorrowedFd};

/// A non-blocking `eventfd` counter. Any thread may [`notify`]; the thread
/// polling the descriptor calls [`drain`] once it reports readable.
///
/// [`notify`]: EventSignal::notify
/// [`drain`]: EventSignal::drain
#[derive(Debug)]
pub struct EventSignal {
    fd: EventFd,
}

impl EventSignal {
    pub fn new() -> Result<Self, Error> {
        let fd = EventFd::from_value_and_flags(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)?;
        Ok(Self { fd })
    }

    /// Wake the poller. Never blocks.
    pub fn notify(&self) -> Result<(), Error> {
        match self.fd.write(1) {
            // counter saturated: the poller has wake-ups pending anyway
            Ok(_) | Err(Errno::EAGAIN) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Reset the counter and return how many notifications were pending.
    pub fn drain(&self) -> Result<u64, Error> {
        match self.fd.read() {
            Ok(count) => Ok(count),
            Err(Errno::EAGAIN) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

impl AsFd for EventSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}
