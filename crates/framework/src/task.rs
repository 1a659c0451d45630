#![forbid(unsafe_code)]

//! In-flight scans: the registry the dispatcher thread consults and the
//! per-task event emitter workers drive.

use crate::engine::ScanSink;
use crate::error::{Error, code};
use crate::event_signal::EventSignal;
use crate::protocol::{Detection, Event, TaskState, Verdict};
use crate::transport::Connection;
use parking_lot::Mutex;
use slotmap::{KeyData, SlotMap, new_key_type};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

new_key_type! {
    /// Identifies a scan for its whole life. Never zero on the wire.
    pub struct TaskId;
}

impl TaskId {
    pub fn to_wire(self) -> u64 {
        self.0.as_ffi()
    }

    pub fn from_wire(value: u64) -> Self {
        KeyData::from_ffi(value).into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Data,
    Files,
    Urls,
}

#[derive(Debug)]
struct Entry {
    conn: Arc<Connection>,
    token: CancellationToken,
    kind: TaskKind,
}

/// Every scan currently running, across all connections.
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: Mutex<SlotMap<TaskId, Entry>>,
    signal: Arc<EventSignal>,
    max_per_connection: usize,
}

impl TaskRegistry {
    pub fn new(signal: Arc<EventSignal>, max_per_connection: usize) -> Self {
        Self {
            tasks: Mutex::new(SlotMap::with_key()),
            signal,
            max_per_connection: max_per_connection.max(1),
        }
    }

    /// Register a new task on `conn`, or fail with [`Error::Busy`] when the
    /// connection already runs as many as it may.
    pub fn start(self: &Arc<Self>, conn: &Arc<Connection>, kind: TaskKind) -> Result<ScanTask, Error> {
        let mut tasks = self.tasks.lock();
        let running = tasks
            .values()
            .filter(|entry| Arc::ptr_eq(&entry.conn, conn))
            .count();
        if running >= self.max_per_connection {
            return Err(Error::Busy);
        }
        let token = CancellationToken::new();
        let id = tasks.insert(Entry {
            conn: Arc::clone(conn),
            token: token.clone(),
            kind,
        });
        Ok(ScanTask {
            id,
            conn: Arc::clone(conn),
            token,
            state: TaskState::Idle,
            detections: 0,
            registry: Arc::clone(self),
        })
    }

    /// Cancel `id` if it belongs to `conn`. Unknown ids are ignored: the task
    /// may have finished while the request was in flight.
    pub fn cancel(&self, conn: &Arc<Connection>, id: TaskId) -> bool {
        match self.tasks.lock().get(id) {
            Some(entry) if Arc::ptr_eq(&entry.conn, conn) => {
                entry.token.cancel();
                true
            }
            _ => {
                debug!(task = id.to_wire(), "Cancel for unknown task");
                false
            }
        }
    }

    /// Cancel every task started on `conn`.
    pub fn cancel_connection(&self, conn: &Arc<Connection>) -> usize {
        let tasks = self.tasks.lock();
        let mut cancelled = 0;
        for entry in tasks.values().filter(|entry| Arc::ptr_eq(&entry.conn, conn)) {
            entry.token.cancel();
            cancelled += 1;
        }
        cancelled
    }

    fn finish(&self, id: TaskId) {
        self.tasks.lock().remove(id);
        if let Err(err) = self.signal.notify() {
            warn!(%err, "Failed to wake dispatcher");
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dump_status(&self) {
        let tasks = self.tasks.lock();
        info!(tasks = tasks.len(), "Scans in flight");
        for (id, entry) in tasks.iter() {
            info!(
                task = id.to_wire(),
                kind = ?entry.kind,
                cancelled = entry.token.is_cancelled(),
                "Scan"
            );
        }
    }
}

/// Emits the events of one task and guarantees it ends with exactly one
/// terminal event. A task dropped without finishing reports a server error.
#[derive(Debug)]
pub struct ScanTask {
    id: TaskId,
    conn: Arc<Connection>,
    token: CancellationToken,
    state: TaskState,
    detections: u32,
    registry: Arc<TaskRegistry>,
}

impl ScanTask {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Send START. A failure here means the peer is gone.
    pub fn started(&mut self) -> Result<(), Error> {
        let event = Event::Started {
            task: self.id.to_wire(),
        };
        self.state.advance(&event)?;
        self.conn.send_frame(&event.encode())
    }

    /// Report one finding. Returns `false` once the task is cancelled; the
    /// finding is then dropped.
    pub fn detected(&mut self, detection: Detection) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.detections += 1;
        self.emit(Event::Detected {
            task: self.id.to_wire(),
            detection,
        });
        true
    }

    /// Report the outcome of the engine call(s). Cancellation wins over
    /// whatever the engine returned.
    pub fn finish(mut self, result: Result<(), Error>) {
        let task = self.id.to_wire();
        let event = match result {
            _ if self.is_cancelled() => Event::Cancelled { task },
            Ok(()) => Event::Completed {
                task,
                verdict: Verdict::from_count(self.detections as usize),
                detections: self.detections,
            },
            Err(Error::Cancelled) => Event::Cancelled { task },
            Err(err) => {
                debug!(task, %err, "Scan failed");
                Event::Failed {
                    task,
                    code: err.code(),
                }
            }
        };
        self.emit(event);
    }

    fn emit(&mut self, event: Event) {
        if let Err(err) = self.state.advance(&event) {
            warn!(task = self.id.to_wire(), %err, "Dropping out of order event");
            return;
        }
        if let Err(err) = self.conn.send_frame(&event.encode()) {
            debug!(task = self.id.to_wire(), %err, "Client gone, event discarded");
        }
    }
}

impl ScanSink for ScanTask {
    fn on_detected(&mut self, detection: Detection) -> bool {
        self.detected(detection)
    }

    fn is_cancelled(&self) -> bool {
        ScanTask::is_cancelled(self)
    }
}

impl Drop for ScanTask {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.emit(Event::Failed {
                task: self.id.to_wire(),
                code: code::SERVER,
            });
        }
        self.registry.finish(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Severity, ThreatType};
    use crate::transport::SockId;
    use pretty_assertions::assert_eq;
    use std::os::unix::net::UnixStream;

    struct Peer {
        server: Arc<Connection>,
        client: Connection,
    }

    fn peer() -> Peer {
        let (server, client) = UnixStream::pair().unwrap();
        Peer {
            server: Arc::new(Connection::new(server, SockId::ContentScreening, 1 << 20)),
            client: Connection::new(client, SockId::ContentScreening, 1 << 20),
        }
    }

    fn registry(limit: usize) -> Arc<TaskRegistry> {
        Arc::new(TaskRegistry::new(Arc::new(EventSignal::new().unwrap()), limit))
    }

    fn next(client: &Connection) -> Event {
        Event::decode(client.receive_frame().unwrap()).unwrap()
    }

    fn detection() -> Detection {
        Detection {
            severity: Severity::Low,
            threat_type: ThreatType::Malware,
            malware_name: "Test".into(),
            variant: None,
            detail_url: None,
            target: None,
            timestamp: 0,
        }
    }

    #[test]
    fn wire_ids_roundtrip_and_are_never_zero() {
        let mut map = SlotMap::<TaskId, ()>::with_key();
        for _ in 0..4 {
            let id = map.insert(());
            assert_ne!(id.to_wire(), 0);
            assert_eq!(TaskId::from_wire(id.to_wire()), id);
        }
    }

    #[test]
    fn completed_scan_reports_verdict_and_count() {
        let registry = registry(4);
        let peer = peer();
        let mut task = registry.start(&peer.server, TaskKind::Data).unwrap();
        let id = task.id().to_wire();
        task.started().unwrap();
        assert!(task.detected(detection()));
        task.finish(Ok(()));

        assert_eq!(next(&peer.client), Event::Started { task: id });
        assert!(matches!(next(&peer.client), Event::Detected { task, .. } if task == id));
        assert_eq!(
            next(&peer.client),
            Event::Completed {
                task: id,
                verdict: Verdict::MalwareDetected,
                detections: 1
            }
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn cancellation_overrides_engine_success() {
        let registry = registry(4);
        let peer = peer();
        let mut task = registry.start(&peer.server, TaskKind::Files).unwrap();
        let id = task.id();
        task.started().unwrap();
        assert!(registry.cancel(&peer.server, id));
        assert!(!task.detected(detection()));
        task.finish(Ok(()));

        assert_eq!(next(&peer.client), Event::Started { task: id.to_wire() });
        assert_eq!(next(&peer.client), Event::Cancelled { task: id.to_wire() });
    }

    #[test]
    fn only_the_owning_connection_may_cancel() {
        let registry = registry(4);
        let owner = peer();
        let other = peer();
        let task = registry.start(&owner.server, TaskKind::Urls).unwrap();
        assert!(!registry.cancel(&other.server, task.id()));
        assert!(!task.is_cancelled());
        assert_eq!(registry.cancel_connection(&owner.server), 1);
        assert!(task.is_cancelled());
    }

    #[test]
    fn per_connection_limit() {
        let registry = registry(2);
        let first = peer();
        let second = peer();
        let _a = registry.start(&first.server, TaskKind::Data).unwrap();
        let _b = registry.start(&first.server, TaskKind::Data).unwrap();
        assert!(matches!(
            registry.start(&first.server, TaskKind::Data),
            Err(Error::Busy)
        ));
        let _c = registry.start(&second.server, TaskKind::Data).unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn dropped_task_fails_with_server_error() {
        let registry = registry(4);
        let peer = peer();
        let mut task = registry.start(&peer.server, TaskKind::Data).unwrap();
        let id = task.id().to_wire();
        task.started().unwrap();
        drop(task);

        assert_eq!(next(&peer.client), Event::Started { task: id });
        assert_eq!(
            next(&peer.client),
            Event::Failed {
                task: id,
                code: code::SERVER
            }
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn engine_errors_become_error_frames() {
        let registry = registry(4);
        let peer = peer();
        let mut task = registry.start(&peer.server, TaskKind::Data).unwrap();
        let id = task.id().to_wire();
        task.started().unwrap();
        task.finish(Err(Error::EngineNotActivated));
        next(&peer.client);
        assert_eq!(
            next(&peer.client),
            Event::Failed {
                task: id,
                code: code::ENGINE_NOT_ACTIVATED
            }
        );
    }

    #[test]
    fn events_to_a_closed_peer_are_discarded() {
        let registry = registry(4);
        let peer = peer();
        let mut task = registry.start(&peer.server, TaskKind::Data).unwrap();
        drop(peer.client);
        // START may or may not fail depending on buffering; neither panics.
        let _ = task.started();
        task.detected(detection());
        task.finish(Ok(()));
        assert!(registry.is_empty());
    }
}
