#![forbid(unsafe_code)]

use crate::error::Error;
use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use std::os::fd::AsFd;
use std::path::PathBuf;

/// Identity of the process on the other end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub uid: u32,
    pub gid: u32,
    pub pid: i32,
    /// Security label of the peer process, when the kernel exposes one.
    pub label: Option<String>,
    pub exe: Option<PathBuf>,
}

impl Credential {
    pub fn of_peer(fd: &impl AsFd) -> Result<Self, Error> {
        let cred = getsockopt(fd, PeerCredentials)?;
        let pid = cred.pid();
        Ok(Self {
            uid: cred.uid(),
            gid: cred.gid(),
            pid,
            label: read_label(pid),
            exe: procfs::process::Process::new(pid)
                .and_then(|process| process.exe())
                .ok(),
        })
    }
}

fn read_label(pid: i32) -> Option<String> {
    let raw = std::fs::read_to_string(format!("/proc/{pid}/attr/current")).ok()?;
    let label = raw.trim_end_matches(['\0', '\n']).trim();
    (!label.is_empty()).then(|| label.to_owned())
}
