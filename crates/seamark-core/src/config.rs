//! Discovery engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for a [crate::ServiceDirectory].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Pacing interval between registry polls for one service, in seconds.
    #[serde(default = "default_lookup_interval_secs")]
    pub lookup_interval_secs: u64,
    /// Fixed delay after a failed poll before the loop tries again, in
    /// milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Ceiling on concurrently running notification deliveries.
    #[serde(default = "default_notify_workers")]
    pub notify_workers: usize,
    /// Backlog bound of the notification queue; submissions beyond it are
    /// dropped and counted.
    #[serde(default = "default_notify_queue")]
    pub notify_queue: usize,
    /// Protocol stamped on endpoints resolved without an explicit cluster
    /// key.
    #[serde(default = "default_protocol")]
    pub default_protocol: String,
}

fn default_lookup_interval_secs() -> u64 {
    30
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_notify_workers() -> usize {
    30
}

fn default_notify_queue() -> usize {
    20_000
}

fn default_protocol() -> String {
    "http".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            lookup_interval_secs: default_lookup_interval_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            notify_workers: default_notify_workers(),
            notify_queue: default_notify_queue(),
            default_protocol: default_protocol(),
        }
    }
}

impl DiscoveryConfig {
    pub fn lookup_interval(&self) -> Duration {
        Duration::from_secs(self.lookup_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
