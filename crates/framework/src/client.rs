#![forbid(unsafe_code)]

//! Blocking client for the daemon's sockets.

use crate::error::Error;
use crate::protocol::{
    AdminReply, Detection, EngineInfo, EngineKind, Event, NO_TASK, Request, TaskState, Verdict,
};
use crate::task::TaskId;
use crate::transport::{Connection, SockId, SocketTable};
use std::collections::VecDeque;

/// How a task ended.
#[derive(Debug)]
pub enum Outcome {
    Completed(Verdict),
    Cancelled,
    Failed(Error),
}

/// Everything a task reported.
#[derive(Debug)]
pub struct TaskReport {
    pub task: TaskId,
    pub detections: Vec<Detection>,
    pub outcome: Outcome,
}

impl TaskReport {
    pub fn is_clean(&self) -> bool {
        matches!(self.outcome, Outcome::Completed(Verdict::NoMalware))
    }
}

#[derive(Debug)]
pub struct Client {
    conn: Connection,
    /// Events read while waiting for something else.
    backlog: VecDeque<Event>,
}

impl Client {
    pub fn connect(sock: SockId, sockets: &SocketTable) -> Result<Self, Error> {
        Ok(Self {
            conn: Connection::connect(sockets.path(sock), sock)?,
            backlog: VecDeque::new(),
        })
    }

    pub fn sock_id(&self) -> SockId {
        self.conn.sock_id()
    }

    fn send(&self, request: Request) -> Result<(), Error> {
        match self.conn.send_frame(&request.into_payload()) {
            // the daemon may have said why before hanging up
            Err(Error::Disconnected) => match self.conn.receive_frame() {
                Ok(frame) => match Event::decode(frame)? {
                    Event::Failed { code, .. } => Err(Error::from_code(code)),
                    _ => Err(Error::Disconnected),
                },
                Err(_) => Err(Error::Disconnected),
            },
            other => other,
        }
    }

    fn read_event(&mut self) -> Result<Event, Error> {
        Event::decode(self.conn.receive_frame()?)
    }

    /// Send a scan request and wait for the daemon to accept it.
    fn start(&mut self, request: Request) -> Result<TaskId, Error> {
        self.send(request)?;
        loop {
            match self.read_event()? {
                Event::Started { task } => return Ok(TaskId::from_wire(task)),
                Event::Failed { task, code } if task == NO_TASK => {
                    return Err(Error::from_code(code));
                }
                event => self.backlog.push_back(event),
            }
        }
    }

    pub fn scan_data(&mut self, data: impl Into<Vec<u8>>) -> Result<TaskId, Error> {
        self.start(Request::ScanData(data.into()))
    }

    pub fn scan_files<I, S>(&mut self, paths: I) -> Result<TaskId, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start(Request::ScanFiles(paths.into_iter().map(Into::into).collect()))
    }

    pub fn check_urls<I, S>(&mut self, urls: I) -> Result<TaskId, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start(Request::CheckUrls(urls.into_iter().map(Into::into).collect()))
    }

    /// Ask the daemon to stop `task`. The task still ends with its own
    /// terminal event.
    pub fn cancel(&mut self, task: TaskId) -> Result<(), Error> {
        self.send(Request::Cancel(task.to_wire()))
    }

    /// The next event of any task.
    pub fn next_event(&mut self) -> Result<Event, Error> {
        match self.backlog.pop_front() {
            Some(event) => Ok(event),
            None => self.read_event(),
        }
    }

    /// Collect the events of `task` until it ends. Events of other tasks
    /// are kept for later, also when waiting fails.
    pub fn wait(&mut self, task: TaskId) -> Result<TaskReport, Error> {
        let mut detections = Vec::new();
        let mut others = VecDeque::new();
        let mut pending = std::mem::take(&mut self.backlog);
        let outcome = self.collect(task.to_wire(), &mut pending, &mut others, &mut detections);
        others.extend(pending);
        self.backlog = others;
        Ok(TaskReport {
            task,
            detections,
            outcome: outcome?,
        })
    }

    fn collect(
        &mut self,
        wire: u64,
        pending: &mut VecDeque<Event>,
        others: &mut VecDeque<Event>,
        detections: &mut Vec<Detection>,
    ) -> Result<Outcome, Error> {
        let mut state = TaskState::Started;
        loop {
            let event = match pending.pop_front() {
                Some(event) => event,
                None => self.read_event()?,
            };
            if event.task() != wire {
                others.push_back(event);
                continue;
            }
            state.advance(&event)?;
            match event {
                Event::Detected { detection, .. } => detections.push(detection),
                Event::Completed { verdict, .. } => return Ok(Outcome::Completed(verdict)),
                Event::Cancelled { .. } => return Ok(Outcome::Cancelled),
                Event::Failed { code, .. } => return Ok(Outcome::Failed(Error::from_code(code))),
                Event::Started { .. } => {}
            }
        }
    }

    fn admin(&mut self, request: Request) -> Result<AdminReply, Error> {
        self.send(request)?;
        AdminReply::decode(self.conn.receive_frame()?)
    }

    pub fn engine_info(&mut self, kind: EngineKind) -> Result<EngineInfo, Error> {
        self.admin(Request::EngineInfo(kind))?
            .info
            .ok_or_else(|| Error::Protocol("engine info reply without info".into()))
    }

    pub fn engine_open(&mut self, kind: EngineKind) -> Result<(), Error> {
        self.admin(Request::EngineOpen(kind)).map(drop)
    }

    pub fn engine_close(&mut self, kind: EngineKind) -> Result<(), Error> {
        self.admin(Request::EngineClose(kind)).map(drop)
    }

    pub fn engine_set_enabled(&mut self, kind: EngineKind, enabled: bool) -> Result<(), Error> {
        self.admin(Request::EngineSetEnabled { kind, enabled }).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::os::unix::net::UnixStream;

    fn pair() -> (Client, Connection) {
        let (left, right) = UnixStream::pair().unwrap();
        let client = Client {
            conn: Connection::new(left, SockId::ContentScreening, 1 << 20),
            backlog: VecDeque::new(),
        };
        (client, Connection::new(right, SockId::ContentScreening, 1 << 20))
    }

    fn task(index: u64) -> TaskId {
        TaskId::from_wire(index)
    }

    #[test]
    fn wait_collects_its_task_and_keeps_the_rest() {
        let (mut client, daemon) = pair();
        for event in [
            Event::Started { task: task(2).to_wire() },
            Event::Cancelled { task: task(1).to_wire() },
        ] {
            daemon.send_frame(&event.encode()).unwrap();
        }

        let report = client.wait(task(1)).unwrap();
        assert!(matches!(report.outcome, Outcome::Cancelled));
        assert_eq!(client.next_event().unwrap(), Event::Started { task: task(2).to_wire() });
    }

    #[test]
    fn failed_wait_keeps_events_of_other_tasks() {
        let (mut client, daemon) = pair();
        client.backlog.push_back(Event::Started { task: task(3).to_wire() });
        daemon
            .send_frame(
                &Event::Completed {
                    task: task(2).to_wire(),
                    verdict: Verdict::NoMalware,
                    detections: 0,
                }
                .encode(),
            )
            .unwrap();
        drop(daemon);

        assert!(matches!(
            client.wait(task(1)),
            Err(Error::Disconnected)
        ));
        assert_eq!(client.next_event().unwrap(), Event::Started { task: task(3).to_wire() });
        assert_eq!(
            client.next_event().unwrap(),
            Event::Completed {
                task: task(2).to_wire(),
                verdict: Verdict::NoMalware,
                detections: 0,
            }
        );
    }
}
