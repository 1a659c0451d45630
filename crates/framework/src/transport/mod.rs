//! Unix domain socket plumbing: socket table, listeners, connections and
//! the privilege gate applied to new peers.

mod access;
mod connection;
mod credential;
mod listener;

pub use access::{AccessPolicy, AllowAll, GrantPolicy};
pub use connection::Connection;
pub use credential::Credential;
pub use listener::Listener;

use std::path::{Path, PathBuf};

pub const PRIVILEGE_SCAN: &str = "http://tizen.org/privilege/antivirus.scan";
pub const PRIVILEGE_WEBPROTECT: &str = "http://tizen.org/privilege/antivirus.webprotect";
pub const PRIVILEGE_ADMIN: &str = "http://tizen.org/privilege/antivirus.admin";

const SYSTEM_LABEL: &str = "System";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockId {
    ContentScreening,
    WebProtection,
    Admin,
    Popup,
}

impl SockId {
    pub const ALL: [SockId; 4] = [
        SockId::ContentScreening,
        SockId::WebProtection,
        SockId::Admin,
        SockId::Popup,
    ];

    /// Privilege a peer must hold to talk on this socket.
    pub fn privilege(self) -> Option<&'static str> {
        match self {
            Self::ContentScreening => Some(PRIVILEGE_SCAN),
            Self::WebProtection => Some(PRIVILEGE_WEBPROTECT),
            Self::Admin => Some(PRIVILEGE_ADMIN),
            Self::Popup => None,
        }
    }

    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::Popup => None,
            _ => Some(SYSTEM_LABEL),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentScreening => "cs",
            Self::WebProtection => "wp",
            Self::Admin => "admin",
            Self::Popup => "popup",
        }
    }
}

impl std::fmt::Display for SockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketDescriptor {
    pub id: SockId,
    pub path: PathBuf,
    pub privilege: Option<&'static str>,
    pub label: Option<&'static str>,
}

/// Where every domain socket lives, resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketTable {
    descriptors: Vec<SocketDescriptor>,
    mode: u32,
}

impl SocketTable {
    pub fn from_config(sockets: &config::Sockets) -> Self {
        let descriptors = SockId::ALL
            .into_iter()
            .map(|id| {
                let path = match id {
                    SockId::ContentScreening => &sockets.content_screening,
                    SockId::WebProtection => &sockets.web_protection,
                    SockId::Admin => &sockets.admin,
                    SockId::Popup => &sockets.popup,
                };
                SocketDescriptor {
                    id,
                    path: path.clone(),
                    privilege: id.privilege(),
                    label: id.label(),
                }
            })
            .collect();
        Self {
            descriptors,
            mode: sockets.mode,
        }
    }

    pub fn descriptor(&self, id: SockId) -> &SocketDescriptor {
        // the table is built from SockId::ALL, in order
        &self.descriptors[id as usize]
    }

    pub fn path(&self, id: SockId) -> &Path {
        &self.descriptor(id).path
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }
}
