use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Engines {
    pub content_screening: Engine,

    pub web_protection: Engine,

    /// Serialize every call into a vendor engine behind a lock.
    ///
    /// # Note
    ///
    /// Engines are required to support concurrent scans. Turn this on only
    /// for an engine known to break that contract; it makes every scan on
    /// the engine wait for the previous one.
    pub serialize_calls: bool,
}

impl Default for Engines {
    fn default() -> Self {
        Self {
            content_screening: Engine {
                path: PathBuf::from("/usr/lib/csr/engines/libcsr-cs-engine.so"),
                ..Default::default()
            },
            web_protection: Engine {
                path: PathBuf::from("/usr/lib/csr/engines/libcsr-wp-engine.so"),
                ..Default::default()
            },
            serialize_calls: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Engine {
    /// Shared library implementing the engine ABI. A library installed here
    /// is only picked up by the next explicit engine open.
    pub path: PathBuf,

    /// Open the engine while the daemon starts. When false the engine stays
    /// closed until an admin client opens it.
    pub load_on_start: bool,

    /// Key/value pairs handed to the engine right after it is opened. Only
    /// web protection engines accept configuration.
    pub options: BTreeMap<String, String>,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            load_on_start: true,
            options: BTreeMap::new(),
        }
    }
}
