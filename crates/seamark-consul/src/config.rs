//! Consul agent connection settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Consul agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Base URL of the local Consul agent
    #[serde(default = "default_url")]
    pub url: String,
    /// ACL token sent as X-Consul-Token on every request
    #[serde(default)]
    pub token: Option<String>,
    /// How long Consul may hold a blocking health query open
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
    /// Slack added on top of the wait time before the HTTP call itself
    /// times out
    #[serde(default = "default_timeout_buffer_secs")]
    pub timeout_buffer_secs: u64,
    /// Timeout for non-blocking agent calls (register, check updates)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// TTL of the check attached to registered services; 0 registers
    /// services without a check and disables heartbeating
    #[serde(default = "default_check_ttl_secs")]
    pub check_ttl_secs: u64,
    /// How long an instance may stay critical before Consul removes it
    #[serde(default = "default_deregister_after_secs")]
    pub deregister_after_secs: u64,
}

impl ConsulConfig {
    /// Timeout for blocking health queries: the advertised wait plus slack
    /// for Consul's own jitter and the network round trip.
    pub fn blocking_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_secs + self.timeout_buffer_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn check_ttl_enabled(&self) -> bool {
        self.check_ttl_secs > 0
    }
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: None,
            wait_secs: default_wait_secs(),
            timeout_buffer_secs: default_timeout_buffer_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            check_ttl_secs: default_check_ttl_secs(),
            deregister_after_secs: default_deregister_after_secs(),
        }
    }
}

// Default value functions
fn default_url() -> String {
    "http://localhost:8500".to_string()
}

fn default_wait_secs() -> u64 {
    600
}

fn default_timeout_buffer_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_check_ttl_secs() -> u64 {
    10
}

fn default_deregister_after_secs() -> u64 {
    120
}
