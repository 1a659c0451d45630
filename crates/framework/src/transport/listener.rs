#![deny(unsafe_code)]

use super::{SockId, SocketDescriptor};
use crate::error::Error;
use std::ffi::CString;
use std::io::ErrorKind;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const SMACKFS: &str = "/sys/fs/smackfs";
const SMACK_XATTR: &[u8] = b"security.SMACK64IPIN\0";

/// A bound, non-blocking domain socket. The socket file is removed on drop.
#[derive(Debug)]
pub struct Listener {
    id: SockId,
    path: PathBuf,
    inner: UnixListener,
}

impl Listener {
    pub fn bind(descriptor: &SocketDescriptor, mode: u32) -> Result<Self, Error> {
        let path = &descriptor.path;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        remove_stale(path)?;

        let inner = UnixListener::bind(path)?;
        inner.set_nonblocking(true)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;

        if let Some(label) = descriptor.label
            && Path::new(SMACKFS).exists()
            && let Err(err) = apply_label(path, label)
        {
            warn!(path = %path.display(), label, %err, "Failed to label socket");
        }

        debug!(sock = %descriptor.id, path = %path.display(), "Listening");
        Ok(Self {
            id: descriptor.id,
            path: path.clone(),
            inner,
        })
    }

    pub fn id(&self) -> SockId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept one pending peer, `None` when nobody is waiting. The returned
    /// stream is blocking.
    pub fn accept(&self) -> Result<Option<UnixStream>, Error> {
        match self.inner.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                Ok(Some(stream))
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path)
            && err.kind() != ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), %err, "Failed to remove socket file");
        }
    }
}

/// Remove a socket file left behind by a previous run. Anything that is not
/// a socket is left alone and reported.
fn remove_stale(path: &Path) -> Result<(), Error> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            debug!(path = %path.display(), "Removing stale socket");
            std::fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => Err(Error::InvalidParameter(format!(
            "{} exists and is not a socket",
            path.display()
        ))),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[allow(unsafe_code)]
fn apply_label(path: &Path, label: &str) -> std::io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())?;
    // SAFETY: both strings are NUL terminated and outlive the call; the value
    // pointer is valid for `label.len()` bytes.
    let ret = unsafe {
        libc::setxattr(
            c_path.as_ptr(),
            SMACK_XATTR.as_ptr().cast(),
            label.as_ptr().cast(),
            label.len(),
            0,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
