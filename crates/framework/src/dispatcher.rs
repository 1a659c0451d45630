#![forbid(unsafe_code)]

//! Single threaded readiness loop multiplexing every listener, every client
//! connection and the wake-up signal.

use crate::buffer::FrameBuffer;
use crate::error::Error;
use crate::event_signal::EventSignal;
use crate::protocol::{NO_TASK, error_reply};
use crate::transport::{AccessPolicy, Connection, Listener, SockId, SocketTable};
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use rustc_hash::FxHashMap;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Domain logic behind one or more sockets. Hooks run on the dispatcher
/// thread and must not block on scans.
pub trait Service: Send + Sync {
    fn sock_ids(&self) -> &[SockId];

    /// Handle one request frame. An error closes the connection.
    fn on_message_process(&self, conn: &Arc<Connection>, frame: FrameBuffer) -> Result<(), Error>;

    fn on_connection_closed(&self, _conn: &Arc<Connection>) {}

    /// Whether the service has no work in flight.
    fn is_idle(&self) -> bool {
        true
    }

    fn dump_status(&self) {}
}

#[derive(Debug, Default)]
struct Control {
    stop: AtomicBool,
    dump: AtomicBool,
}

/// Controls a running [`Dispatcher`] from any thread.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    control: Arc<Control>,
    signal: Arc<EventSignal>,
}

impl DispatcherHandle {
    /// Make the loop return after its current iteration.
    pub fn stop(&self) {
        self.control.stop.store(true, Ordering::Release);
        self.wake();
    }

    /// Log connections, scans and engine state on the dispatcher thread.
    pub fn request_status(&self) {
        self.control.dump.store(true, Ordering::Release);
        self.wake();
    }

    pub fn wake(&self) {
        if let Err(err) = self.signal.notify() {
            warn!(%err, "Failed to wake dispatcher");
        }
    }
}

struct Bound {
    listener: Listener,
    privilege: Option<&'static str>,
    service: Arc<dyn Service>,
}

struct Registered {
    conn: Arc<Connection>,
    service: Arc<dyn Service>,
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Signal,
    Listener(usize),
    Connection(RawFd),
}

pub type IdleChecker = Box<dyn Fn() -> bool + Send>;

pub struct Dispatcher {
    signal: Arc<EventSignal>,
    control: Arc<Control>,
    policy: Arc<dyn AccessPolicy>,
    listeners: Vec<Bound>,
    services: Vec<Arc<dyn Service>>,
    connections: FxHashMap<RawFd, Registered>,
    idle_checker: Option<IdleChecker>,
    idle_timeout: Duration,
    max_frame_size: u32,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(settings: &config::Service, policy: Arc<dyn AccessPolicy>) -> Result<Self, Error> {
        Ok(Self {
            signal: Arc::new(EventSignal::new()?),
            control: Arc::default(),
            policy,
            listeners: Vec::new(),
            services: Vec::new(),
            connections: FxHashMap::default(),
            idle_checker: None,
            idle_timeout: settings.idle_timeout,
            max_frame_size: settings.max_frame_size,
            send_timeout: settings.send_timeout,
        })
    }

    /// The signal the loop polls. Completing scans notify it.
    pub fn signal(&self) -> Arc<EventSignal> {
        Arc::clone(&self.signal)
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            control: Arc::clone(&self.control),
            signal: Arc::clone(&self.signal),
        }
    }

    /// Bind a listener for every socket `service` serves.
    pub fn register(&mut self, sockets: &SocketTable, service: Arc<dyn Service>) -> Result<(), Error> {
        for &id in service.sock_ids() {
            let descriptor = sockets.descriptor(id);
            let listener = Listener::bind(descriptor, sockets.mode())?;
            self.listeners.push(Bound {
                listener,
                privilege: descriptor.privilege,
                service: Arc::clone(&service),
            });
        }
        if !self.services.iter().any(|known| Arc::ptr_eq(known, &service)) {
            self.services.push(service);
        }
        Ok(())
    }

    /// Extra condition for idle shutdown, checked after every service
    /// reported idle.
    pub fn set_idle_checker(&mut self, checker: impl Fn() -> bool + Send + 'static) {
        self.idle_checker = Some(Box::new(checker));
    }

    fn is_idle(&self) -> bool {
        self.connections.is_empty()
            && self.services.iter().all(|service| service.is_idle())
            && self.idle_checker.as_ref().is_none_or(|checker| checker())
    }

    fn poll_timeout(&self) -> PollTimeout {
        if self.idle_timeout.is_zero() {
            return PollTimeout::NONE;
        }
        i32::try_from(self.idle_timeout.as_millis())
            .ok()
            .and_then(|millis| PollTimeout::try_from(millis).ok())
            .unwrap_or(PollTimeout::MAX)
    }

    /// Serve until stopped or idle for a whole timeout.
    pub fn run(mut self) -> Result<(), Error> {
        info!(listeners = self.listeners.len(), "Dispatcher running");
        let result = self.serve();
        let open: Vec<RawFd> = self.connections.keys().copied().collect();
        for fd in open {
            self.close(fd);
        }
        info!("Dispatcher stopped");
        result
    }

    fn serve(&mut self) -> Result<(), Error> {
        let timeout = self.poll_timeout();
        loop {
            if self.control.stop.load(Ordering::Acquire) {
                return Ok(());
            }
            if self.control.dump.swap(false, Ordering::AcqRel) {
                self.dump_status();
            }

            let mut sources = Vec::with_capacity(1 + self.listeners.len() + self.connections.len());
            let mut fds = Vec::with_capacity(sources.capacity());
            fds.push(PollFd::new(self.signal.as_fd(), PollFlags::POLLIN));
            sources.push(Source::Signal);
            for (index, bound) in self.listeners.iter().enumerate() {
                fds.push(PollFd::new(bound.listener.as_fd(), PollFlags::POLLIN));
                sources.push(Source::Listener(index));
            }
            for (&fd, registered) in &self.connections {
                fds.push(PollFd::new(registered.conn.as_fd(), PollFlags::POLLIN));
                sources.push(Source::Connection(fd));
            }

            let ready = match poll(&mut fds, timeout) {
                Ok(ready) => ready,
                Err(Errno::EINTR) => continue,
                Err(err) => return Err(err.into()),
            };
            let ready: Vec<Source> = fds
                .iter()
                .zip(sources)
                .filter(|(fd, _)| fd.revents().is_some_and(|events| !events.is_empty()))
                .map(|(_, source)| source)
                .take(usize::try_from(ready).unwrap_or(0))
                .collect();
            drop(fds);

            if ready.is_empty() {
                if self.is_idle() {
                    info!(timeout = ?self.idle_timeout, "Idle, shutting down");
                    return Ok(());
                }
                continue;
            }

            for source in ready {
                match source {
                    Source::Signal => {
                        let pending = self.signal.drain()?;
                        trace!(pending, "Woken");
                    }
                    Source::Listener(index) => self.accept_all(index),
                    Source::Connection(fd) => self.receive(fd),
                }
            }
        }
    }

    fn accept_all(&mut self, index: usize) {
        loop {
            let bound = &self.listeners[index];
            let stream = match bound.listener.accept() {
                Ok(Some(stream)) => stream,
                Ok(None) => return,
                Err(err) => {
                    warn!(sock = %bound.listener.id(), %err, "Failed to accept connection");
                    return;
                }
            };
            let conn = Arc::new(Connection::new(stream, bound.listener.id(), self.max_frame_size));
            if let Err(err) = conn.set_send_timeout(Some(self.send_timeout)) {
                warn!(%err, "Failed to set send timeout");
            }
            if !self.admit(&conn, bound.privilege) {
                if let Err(err) = conn.send_frame(&error_reply(NO_TASK, &Error::PermissionDenied)) {
                    debug!(%err, "Failed to report denial");
                }
                conn.shutdown();
                continue;
            }

            let service = Arc::clone(&bound.service);
            let fd = conn.as_raw_fd();
            debug!(sock = %conn.sock_id(), fd, "Connection accepted");
            self.connections.insert(fd, Registered { conn, service });
        }
    }

    fn admit(&self, conn: &Connection, privilege: Option<&'static str>) -> bool {
        let Some(privilege) = privilege else {
            return true;
        };
        match conn.credential() {
            Ok(credential) if self.policy.check(credential, privilege) => true,
            Ok(credential) => {
                info!(
                    uid = credential.uid,
                    pid = credential.pid,
                    exe = ?credential.exe,
                    privilege,
                    "Permission denied"
                );
                false
            }
            Err(err) => {
                warn!(%err, "Failed to read peer credentials");
                false
            }
        }
    }

    fn receive(&mut self, fd: RawFd) {
        let Some(registered) = self.connections.get(&fd) else {
            return;
        };
        let conn = Arc::clone(&registered.conn);
        let service = Arc::clone(&registered.service);

        let outcome = conn.receive().and_then(|frames| {
            frames
                .into_iter()
                .try_for_each(|frame| service.on_message_process(&conn, frame))
        });
        match outcome {
            Ok(()) => {}
            Err(Error::Disconnected) => {
                debug!(fd, "Peer disconnected");
                self.close(fd);
            }
            Err(err) => {
                warn!(fd, sock = %conn.sock_id(), %err, "Closing connection");
                self.close(fd);
            }
        }
    }

    fn close(&mut self, fd: RawFd) {
        if let Some(Registered { conn, service }) = self.connections.remove(&fd) {
            service.on_connection_closed(&conn);
            conn.shutdown();
        }
    }

    fn dump_status(&self) {
        info!(
            listeners = self.listeners.len(),
            connections = self.connections.len(),
            "Dispatcher status"
        );
        for (fd, registered) in &self.connections {
            let credential = registered.conn.credential().ok();
            info!(
                fd,
                sock = %registered.conn.sock_id(),
                pid = credential.map(|credential| credential.pid),
                uid = credential.map(|credential| credential.uid),
                "Connection"
            );
        }
        for service in &self.services {
            service.dump_status();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::AllowAll;
    use parking_lot::Mutex;
    use std::time::Instant;
    use tempfile::tempdir;

    /// Echoes every frame back and records closed connections.
    #[derive(Default)]
    struct Echo {
        closed: Mutex<usize>,
    }

    impl Service for Echo {
        fn sock_ids(&self) -> &[SockId] {
            &[SockId::ContentScreening]
        }

        fn on_message_process(&self, conn: &Arc<Connection>, frame: FrameBuffer) -> Result<(), Error> {
            if frame.to_vec() == b"bye" {
                return Err(Error::Protocol("client asked to be dropped".into()));
            }
            conn.send_frame(&frame)
        }

        fn on_connection_closed(&self, _conn: &Arc<Connection>) {
            *self.closed.lock() += 1;
        }
    }

    struct DenyAll;

    impl AccessPolicy for DenyAll {
        fn check(&self, _: &crate::transport::Credential, _: &str) -> bool {
            false
        }
    }

    fn settings(idle: u64) -> config::Service {
        config::Service {
            idle_timeout: Duration::from_millis(idle),
            ..Default::default()
        }
    }

    #[test]
    fn echoes_until_stopped() {
        let dir = tempdir().unwrap();
        let table = SocketTable::from_config(&config::Sockets::in_dir(dir.path()));
        let echo = Arc::new(Echo::default());
        let mut dispatcher = Dispatcher::new(&settings(0), Arc::new(AllowAll)).unwrap();
        dispatcher.register(&table, echo.clone()).unwrap();
        let handle = dispatcher.handle();
        let thread = std::thread::spawn(move || dispatcher.run());

        let client = Connection::connect(table.path(SockId::ContentScreening), SockId::ContentScreening).unwrap();
        client.send_frame(&FrameBuffer::from(b"ping".to_vec())).unwrap();
        assert_eq!(client.receive_frame().unwrap().to_vec(), b"ping");

        client.send_frame(&FrameBuffer::from(b"bye".to_vec())).unwrap();
        assert!(matches!(client.receive_frame(), Err(Error::Disconnected)));

        handle.request_status();
        handle.stop();
        thread.join().unwrap().unwrap();
        assert_eq!(*echo.closed.lock(), 1);
        assert!(!table.path(SockId::ContentScreening).exists());
    }

    #[test]
    fn denied_peers_get_one_error_frame() {
        let dir = tempdir().unwrap();
        let table = SocketTable::from_config(&config::Sockets::in_dir(dir.path()));
        let mut dispatcher = Dispatcher::new(&settings(0), Arc::new(DenyAll)).unwrap();
        dispatcher.register(&table, Arc::new(Echo::default())).unwrap();
        let handle = dispatcher.handle();
        let thread = std::thread::spawn(move || dispatcher.run());

        let client = Connection::connect(table.path(SockId::ContentScreening), SockId::ContentScreening).unwrap();
        let reply = crate::protocol::Event::decode(client.receive_frame().unwrap()).unwrap();
        assert_eq!(
            reply,
            crate::protocol::Event::Failed {
                task: NO_TASK,
                code: crate::error::code::PERMISSION_DENIED
            }
        );
        assert!(matches!(client.receive_frame(), Err(Error::Disconnected)));

        handle.stop();
        thread.join().unwrap().unwrap();
    }

    #[test]
    fn exits_when_idle() {
        let dir = tempdir().unwrap();
        let table = SocketTable::from_config(&config::Sockets::in_dir(dir.path()));
        let mut dispatcher = Dispatcher::new(&settings(50), Arc::new(AllowAll)).unwrap();
        dispatcher.register(&table, Arc::new(Echo::default())).unwrap();
        let started = Instant::now();
        dispatcher.run().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn idle_checker_can_veto_shutdown() {
        let dir = tempdir().unwrap();
        let table = SocketTable::from_config(&config::Sockets::in_dir(dir.path()));
        let mut dispatcher = Dispatcher::new(&settings(20), Arc::new(AllowAll)).unwrap();
        dispatcher.register(&table, Arc::new(Echo::default())).unwrap();
        let busy = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&busy);
        dispatcher.set_idle_checker(move || !flag.load(Ordering::Acquire));
        let thread = std::thread::spawn(move || dispatcher.run());

        std::thread::sleep(Duration::from_millis(100));
        assert!(!thread.is_finished());
        busy.store(false, Ordering::Release);
        thread.join().unwrap().unwrap();
    }
}
