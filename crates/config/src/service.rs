use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Service {
    /// The daemon exits after being idle for this long: no connection, no
    /// scan in flight. **Measured in seconds**. Zero keeps it running forever.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub idle_timeout: Duration,

    /// Largest frame accepted from a client, in bytes. Larger length
    /// prefixes are treated as a corrupted stream.
    pub max_frame_size: u32,

    /// Scans a single connection may have in flight at once.
    pub max_tasks_per_connection: usize,

    /// How long a write to a client may block before the connection is
    /// considered dead. **Measured in seconds**. Zero waits forever.
    #[serde_as(as = "serde_with::DurationSeconds")]
    pub send_timeout: Duration,
}

impl Default for Service {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            max_frame_size: 64 * 1024 * 1024,
            max_tasks_per_connection: 16,
            send_timeout: Duration::from_secs(10),
        }
    }
}
