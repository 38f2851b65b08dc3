use serde::{Deserialize, Serialize};

/// Configuration for incremental adjusters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjusterConfig {
    /// Re-reads allowed after a version conflict before giving up.
    pub max_conflict_retries: u32,
}

impl Default for AdjusterConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
        }
    }
}
