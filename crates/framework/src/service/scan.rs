#![forbid(unsafe_code)]

use super::decode_for;
use crate::buffer::FrameBuffer;
use crate::dispatcher::Service;
use crate::engine::EngineManager;
use crate::error::Error;
use crate::protocol::{NO_TASK, Request, error_reply};
use crate::task::{ScanTask, TaskId, TaskKind, TaskRegistry};
use crate::transport::{Connection, SockId};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Content screening and web protection requests. Every scan runs on its
/// own worker thread; the dispatcher thread only sends START.
#[derive(Debug)]
pub struct ScanService {
    engines: Arc<EngineManager>,
    tasks: Arc<TaskRegistry>,
}

enum Job {
    Data(Vec<u8>),
    Files(Vec<PathBuf>),
    Urls(Vec<String>),
}

impl Job {
    fn kind(&self) -> TaskKind {
        match self {
            Self::Data(_) => TaskKind::Data,
            Self::Files(_) => TaskKind::Files,
            Self::Urls(_) => TaskKind::Urls,
        }
    }

    /// Run the job to completion against the current engine.
    fn run(self, engines: &EngineManager, task: &mut ScanTask) -> Result<(), Error> {
        match self {
            Self::Data(data) => engines.content().acquire()?.scan_data(&data, task),
            Self::Files(paths) => {
                let engine = engines.content().acquire()?;
                for path in paths {
                    if task.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    engine.scan_file(&path, task)?;
                }
                Ok(())
            }
            Self::Urls(urls) => {
                let engine = engines.web().acquire()?;
                for url in urls {
                    if task.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    if let Some(detection) = engine.check_url(&url)?.detection() {
                        task.detected(detection);
                    }
                }
                Ok(())
            }
        }
    }
}

impl ScanService {
    pub fn new(engines: Arc<EngineManager>, tasks: Arc<TaskRegistry>) -> Self {
        Self { engines, tasks }
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    fn spawn(&self, conn: &Arc<Connection>, job: Job) -> Result<(), Error> {
        let mut task = match self.tasks.start(conn, job.kind()) {
            Ok(task) => task,
            Err(err @ Error::Busy) => {
                debug!(sock = %conn.sock_id(), "Rejecting scan, too many in flight");
                return conn.send_frame(&error_reply(NO_TASK, &err));
            }
            Err(err) => return Err(err),
        };
        task.started()?;

        let id = task.id().to_wire();
        let engines = Arc::clone(&self.engines);
        let spawned = std::thread::Builder::new()
            .name(format!("scan-{id:x}"))
            .spawn(move || {
                let result = job.run(&engines, &mut task);
                task.finish(result);
            });
        if let Err(err) = spawned {
            // the task went down with the closure and reported the failure
            error!(task = id, %err, "Failed to spawn scan worker");
        }
        Ok(())
    }
}

impl Service for ScanService {
    fn sock_ids(&self) -> &[SockId] {
        &[SockId::ContentScreening, SockId::WebProtection]
    }

    fn on_message_process(&self, conn: &Arc<Connection>, frame: FrameBuffer) -> Result<(), Error> {
        match decode_for(conn, frame)? {
            Request::ScanData(data) => self.spawn(conn, Job::Data(data)),
            Request::ScanFiles(paths) => {
                self.spawn(conn, Job::Files(paths.into_iter().map(PathBuf::from).collect()))
            }
            Request::CheckUrls(urls) => self.spawn(conn, Job::Urls(urls)),
            Request::Cancel(task) => {
                self.tasks.cancel(conn, TaskId::from_wire(task));
                Ok(())
            }
            other => Err(Error::Protocol(format!(
                "{:?} reached the scan service",
                other.command()
            ))),
        }
    }

    fn on_connection_closed(&self, conn: &Arc<Connection>) {
        let cancelled = self.tasks.cancel_connection(conn);
        if cancelled > 0 {
            info!(cancelled, "Client left, cancelling its scans");
        }
    }

    fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    fn dump_status(&self) {
        self.tasks.dump_status();
        self.engines.dump_status();
    }
}
