use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_store::FetchConfig;

/// Knobs for replay and correction runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub fetch: FetchConfig,
    /// Pause between consecutive live writes.
    pub write_delay_ms: u64,
    /// Whether money resync also rewrites per-entry running balances.
    pub thread_running_balances: bool,
    /// Persist the write cursor after this many staged writes.
    pub checkpoint_every: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            write_delay_ms: 50,
            thread_running_balances: true,
            checkpoint_every: 25,
        }
    }
}

impl ReconcileConfig {
    /// No delays anywhere. Used by tests and local snapshot files.
    pub fn unthrottled() -> Self {
        Self {
            fetch: FetchConfig::unthrottled(FetchConfig::default().page_size),
            write_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn write_delay(&self) -> Duration {
        Duration::from_millis(self.write_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: ReconcileConfig =
            serde_json::from_str(r#"{"fetch": {"page_size": 20}, "write_delay_ms": 0}"#).unwrap();
        assert_eq!(config.fetch.page_size, 20);
        assert_eq!(config.fetch.page_delay_ms, 200);
        assert_eq!(config.write_delay_ms, 0);
        assert!(config.thread_running_balances);
        assert_eq!(config.checkpoint_every, 25);
    }
}
