//! The daemon's request handlers, one per group of sockets.

mod admin;
mod scan;

pub use admin::AdminService;
pub use scan::ScanService;

use crate::error::Error;
use crate::protocol::{Command, Request};
use crate::transport::Connection;
use crate::buffer::FrameBuffer;

/// Decode a request and make sure it was sent on a socket that serves it.
fn decode_for(conn: &Connection, frame: FrameBuffer) -> Result<Request, Error> {
    let request = Request::decode(frame)?;
    let command: Command = request.command();
    if command.is_served_by(conn.sock_id()) {
        Ok(request)
    } else {
        Err(Error::Protocol(format!(
            "{command:?} is not served on the {} socket",
            conn.sock_id()
        )))
    }
}
