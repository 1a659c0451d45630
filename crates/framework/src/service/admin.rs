#![forbid(unsafe_code)]

use super::decode_for;
use crate::buffer::FrameBuffer;
use crate::dispatcher::Service;
use crate::engine::EngineManager;
use crate::error::Error;
use crate::protocol::{AdminReply, NO_TASK, Request, error_reply};
use crate::transport::{Connection, SockId};
use std::sync::Arc;
use tracing::info;

/// Engine management for privileged clients. Requests are answered inline
/// on the dispatcher thread.
#[derive(Debug)]
pub struct AdminService {
    engines: Arc<EngineManager>,
}

impl AdminService {
    pub fn new(engines: Arc<EngineManager>) -> Self {
        Self { engines }
    }

    fn execute(&self, request: Request) -> Result<AdminReply, Error> {
        match request {
            Request::EngineInfo(kind) => Ok(AdminReply {
                info: Some(self.engines.info(kind)?),
            }),
            Request::EngineOpen(kind) => {
                self.engines.open(kind)?;
                Ok(AdminReply::default())
            }
            Request::EngineClose(kind) => {
                self.engines.close(kind);
                Ok(AdminReply::default())
            }
            Request::EngineSetEnabled { kind, enabled } => {
                self.engines.set_enabled(kind, enabled);
                Ok(AdminReply::default())
            }
            other => Err(Error::Protocol(format!(
                "{:?} reached the admin service",
                other.command()
            ))),
        }
    }
}

impl Service for AdminService {
    fn sock_ids(&self) -> &[SockId] {
        &[SockId::Admin]
    }

    fn on_message_process(&self, conn: &Arc<Connection>, frame: FrameBuffer) -> Result<(), Error> {
        let request = decode_for(conn, frame)?;
        info!(command = ?request.command(), "Admin request");
        match self.execute(request) {
            Ok(reply) => conn.send_frame(&reply.encode()),
            Err(err) if err.is_fatal_to_connection() => Err(err),
            Err(err) => conn.send_frame(&error_reply(NO_TASK, &err)),
        }
    }
}
