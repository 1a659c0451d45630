#![forbid(unsafe_code)]

use super::Credential;

/// Decides whether a peer holds a privilege.
pub trait AccessPolicy: Send + Sync {
    fn check(&self, credential: &Credential, privilege: &str) -> bool;
}

/// Grants every privilege to every peer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn check(&self, _: &Credential, _: &str) -> bool {
        true
    }
}

/// Uid based grants taken from the `[access]` configuration section.
#[derive(Debug, Clone)]
pub struct GrantPolicy {
    access: config::Access,
}

impl GrantPolicy {
    pub fn new(access: config::Access) -> Self {
        Self { access }
    }
}

impl AccessPolicy for GrantPolicy {
    fn check(&self, credential: &Credential, privilege: &str) -> bool {
        !self.access.enforce || self.access.is_granted(privilege, credential.uid)
    }
}
