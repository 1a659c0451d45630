#![deny(unsafe_code)]

//! Content screening and web protection framework: the daemon side that
//! loads vendor engines and serves scan requests over Unix sockets, and the
//! client side that issues them.

pub mod buffer;
pub mod client;
pub mod daemon;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod event_signal;
pub mod plugin;
pub mod protocol;
pub mod service;
pub mod task;
pub mod transport;
pub mod wire;

pub use buffer::FrameBuffer;
pub use client::{Client, Outcome, TaskReport};
pub use daemon::Daemon;
pub use dispatcher::{Dispatcher, DispatcherHandle, Service};
pub use error::Error;
pub use event_signal::EventSignal;
pub use task::TaskId;
