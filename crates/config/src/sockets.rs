use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Sockets {
    /// Socket clients connect to for buffer and file scans.
    pub content_screening: PathBuf,

    /// Socket clients connect to for URL checks.
    pub web_protection: PathBuf,

    /// Socket used to query, reopen, close and toggle engines.
    pub admin: PathBuf,

    /// Channel the daemon uses to reach the prompt UI. The daemon never
    /// listens on it.
    pub popup: PathBuf,

    /// Permission bits applied to every socket file after binding. Access is
    /// still gated per privilege, so the default lets any local user connect.
    pub mode: u32,
}

impl Default for Sockets {
    fn default() -> Self {
        Self {
            content_screening: PathBuf::from("/run/csr/cs.socket"),
            web_protection: PathBuf::from("/run/csr/wp.socket"),
            admin: PathBuf::from("/run/csr/admin.socket"),
            popup: PathBuf::from("/run/csr/popup.socket"),
            mode: 0o666,
        }
    }
}

impl Sockets {
    /// Place every socket inside `dir`, keeping the default file names.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            content_screening: dir.join("cs.socket"),
            web_protection: dir.join("wp.socket"),
            admin: dir.join("admin.socket"),
            popup: dir.join("popup.socket"),
            ..Default::default()
        }
    }
}
