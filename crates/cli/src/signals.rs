//! Translation of process signals into daemon events.

use flume::Sender;
use tokio::signal::unix::{SignalKind, signal};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalEvent {
    /// `SIGINT` or `SIGTERM`.
    Shutdown,
    /// `SIGHUP`: reload engine libraries, e.g. after a vendor update.
    ReopenEngines,
    /// `SIGUSR1`: log engine, connection and task status.
    DumpStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to install signal handler: {0}")]
    Install(#[from] std::io::Error),

    #[error("Signal event receiver dropped")]
    Disconnected,
}

/// Forward signals to `tx` until a shutdown signal arrives or the receiver
/// goes away.
pub async fn wait_for_signal(tx: Sender<SignalEvent>) -> Result<(), Error> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    let mut user1 = signal(SignalKind::user_defined1())?;

    loop {
        let event = tokio::select! {
            _ = interrupt.recv() => SignalEvent::Shutdown,
            _ = terminate.recv() => SignalEvent::Shutdown,
            _ = hangup.recv() => SignalEvent::ReopenEngines,
            _ = user1.recv() => SignalEvent::DumpStatus,
        };
        debug!(?event, "Signal received");
        tx.send_async(event)
            .await
            .map_err(|_| Error::Disconnected)?;
        if event == SignalEvent::Shutdown {
            return Ok(());
        }
    }
}
