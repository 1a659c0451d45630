use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Access {
    /// Check the peer of every new connection against `grants`. When off,
    /// every local peer may use every domain.
    pub enforce: bool,

    /// Privilege name mapped to the uids holding it. Root holds every
    /// privilege implicitly.
    ///
    /// ```toml
    /// [access.grants]
    /// "http://tizen.org/privilege/antivirus.scan" = [5001]
    /// ```
    pub grants: BTreeMap<String, Vec<u32>>,
}

impl Access {
    pub fn is_granted(&self, privilege: &str, uid: u32) -> bool {
        uid == 0
            || self
                .grants
                .get(privilege)
                .is_some_and(|uids| uids.contains(&uid))
    }
}
