#![forbid(unsafe_code)]

use super::{Credential, SockId};
use crate::buffer::FrameBuffer;
use crate::error::Error;
use crate::wire::{FrameDecoder, LENGTH_PREFIX};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

const READ_CHUNK: usize = 64 * 1024;

/// Frames up to this size are copied into one buffer and written with a
/// single syscall.
const COALESCE_LIMIT: usize = 16 * 1024;

/// Receive side state: the frame decoder and the buffer reads land in.
struct Inbound {
    decoder: FrameDecoder,
    scratch: Box<[u8]>,
}

impl std::fmt::Debug for Inbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbound")
            .field("pending", &self.decoder.pending())
            .finish_non_exhaustive()
    }
}

/// One end of a framed Unix stream.
///
/// Sending and receiving take separate locks, so a worker thread can push
/// events while the dispatcher reads the next request.
#[derive(Debug)]
pub struct Connection {
    sock: SockId,
    stream: UnixStream,
    send: Mutex<()>,
    receive: Mutex<Inbound>,
    credential: OnceLock<Credential>,
}

impl Connection {
    /// Connect to `path` as a client.
    pub fn connect(path: impl AsRef<Path>, sock: SockId) -> Result<Self, Error> {
        let stream = UnixStream::connect(path)?;
        let defaults = config::Service::default();
        Ok(Self::new(stream, sock, defaults.max_frame_size))
    }

    pub fn new(stream: UnixStream, sock: SockId, max_frame_size: u32) -> Self {
        Self {
            sock,
            stream,
            send: Mutex::new(()),
            receive: Mutex::new(Inbound {
                decoder: FrameDecoder::new(max_frame_size),
                scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
            }),
            credential: OnceLock::new(),
        }
    }

    /// Bound every blocking write. `None` waits forever.
    pub fn set_send_timeout(&self, timeout: Option<Duration>) -> Result<(), Error> {
        self.stream
            .set_write_timeout(timeout.filter(|timeout| !timeout.is_zero()))?;
        Ok(())
    }

    pub fn sock_id(&self) -> SockId {
        self.sock
    }

    /// Write `payload` as one frame. Concurrent senders never interleave.
    pub fn send_frame(&self, payload: &FrameBuffer) -> Result<(), Error> {
        let size = u32::try_from(payload.size()).map_err(|_| Error::FrameTooLarge {
            size: u32::MAX,
            limit: u32::MAX,
        })?;
        let _guard = self.send.lock();
        let mut writer = &self.stream;
        let result = if payload.size() <= COALESCE_LIMIT {
            let mut bytes = Vec::with_capacity(LENGTH_PREFIX + payload.size());
            bytes.extend_from_slice(&size.to_le_bytes());
            payload.chunks().for_each(|chunk| bytes.extend_from_slice(chunk));
            writer.write_all(&bytes)
        } else {
            writer
                .write_all(&size.to_le_bytes())
                .and_then(|()| payload.chunks().try_for_each(|chunk| writer.write_all(chunk)))
        };
        result.map_err(map_io)
    }

    /// Perform one read and return every frame completed by it. Must only be
    /// called when the socket is readable, or it blocks.
    pub fn receive(&self) -> Result<Vec<FrameBuffer>, Error> {
        let mut inbound = self.receive.lock();
        self.read_into(&mut inbound)?;
        let mut frames = Vec::new();
        while let Some(frame) = inbound.decoder.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Block until one complete frame has arrived.
    pub fn receive_frame(&self) -> Result<FrameBuffer, Error> {
        let mut inbound = self.receive.lock();
        loop {
            if let Some(frame) = inbound.decoder.next_frame()? {
                return Ok(frame);
            }
            self.read_into(&mut inbound)?;
        }
    }

    fn read_into(&self, inbound: &mut Inbound) -> Result<(), Error> {
        let Inbound { decoder, scratch } = inbound;
        let read = loop {
            match (&self.stream).read(scratch) {
                Ok(0) => return Err(Error::Disconnected),
                Ok(read) => break read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(map_io(err)),
            }
        };
        decoder.feed(&scratch[..read]);
        Ok(())
    }

    /// The peer's identity, looked up once and memoized.
    pub fn credential(&self) -> Result<&Credential, Error> {
        if let Some(credential) = self.credential.get() {
            return Ok(credential);
        }
        let credential = Credential::of_peer(&self.stream)?;
        Ok(self.credential.get_or_init(|| credential))
    }

    /// Stop both directions. Blocked readers and writers on either side wake up.
    pub fn shutdown(&self) {
        if let Err(err) = self.stream.shutdown(Shutdown::Both)
            && err.kind() != ErrorKind::NotConnected
        {
            tracing::debug!(%err, "Failed to shut down connection");
        }
    }
}

fn map_io(err: std::io::Error) -> Error {
    match err.kind() {
        ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::UnexpectedEof => {
            Error::Disconnected
        }
        _ => Error::Io(err),
    }
}

impl AsFd for Connection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
