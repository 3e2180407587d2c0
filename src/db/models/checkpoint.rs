use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Poller sync progress checkpoint.
///
/// Tracks the last block whose events were fully processed. Used to resume
/// polling after restarts without missing events; a window may be replayed
/// after a crash, which the event handlers tolerate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerCheckpoint {
    pub name: String,
    pub last_processed_block: u64,
    pub updated_at: DateTime<Utc>,
}

impl PollerCheckpoint {
    pub fn new(name: impl Into<String>, last_processed_block: u64) -> Self {
        Self {
            name: name.into(),
            last_processed_block,
            updated_at: Utc::now(),
        }
    }
}
