//! TTL check heartbeating
//!
//! Consul marks a TTL-checked service critical when no pass report arrives
//! within the TTL, and removes it entirely after the deregister window. The
//! [ConsulHeartbeat] keeps every locally registered instance alive by
//! reporting a pass at a third of the TTL, leaving room for two missed
//! pulses before Consul reacts.

use crate::client::ConsulClient;
use parking_lot::RwLock;
use seamark_core::HeartbeatReporter;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Periodic TTL check reporter for locally registered instances.
#[derive(Clone)]
pub struct ConsulHeartbeat {
    inner: Arc<HeartbeatInner>,
}

struct HeartbeatInner {
    client: Arc<ConsulClient>,
    instances: RwLock<HashSet<String>>,
    enabled: AtomicBool,
}

impl ConsulHeartbeat {
    /// Starts the pulse task on the current tokio runtime and returns the
    /// handle used to add and remove instances. The pulse cadence follows
    /// the check TTL the client is configured to register with.
    pub fn start(client: Arc<ConsulClient>) -> Self {
        let interval = pulse_interval(client.config().check_ttl_secs);
        let heartbeat = Self {
            inner: Arc::new(HeartbeatInner {
                client,
                instances: RwLock::new(HashSet::new()),
                enabled: AtomicBool::new(true),
            }),
        };

        info!("Started TTL heartbeat (pulse every {}s)", interval.as_secs());

        let worker = heartbeat.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick; registration already reported once.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                worker.pulse().await;
            }
        });

        heartbeat
    }

    /// Globally pauses or resumes pass reporting without forgetting the
    /// tracked instances. While paused, Consul will let their checks go
    /// critical, taking the instances out of rotation.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
        if enabled {
            info!("Heartbeat reporting resumed");
        } else {
            info!("Heartbeat reporting paused");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// The instance ids currently being kept alive, sorted.
    pub fn tracked(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.instances.read().iter().cloned().collect();
        ids.sort();
        ids
    }

    async fn pulse(&self) {
        if !self.is_enabled() {
            return;
        }
        let instances: Vec<String> = self.inner.instances.read().iter().cloned().collect();
        for instance_id in instances {
            if let Err(e) = self.inner.client.check_pass(&instance_id).await {
                warn!("TTL pass for {} failed: {}", instance_id, e);
            }
        }
    }
}

impl HeartbeatReporter for ConsulHeartbeat {
    fn mark_healthy(&self, instance_id: &str) {
        if self.inner.instances.write().insert(instance_id.to_string()) {
            debug!("Tracking TTL check for {}", instance_id);
        }

        // Report immediately instead of waiting out the first pulse.
        let worker = self.clone();
        let instance_id = instance_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = worker.inner.client.check_pass(&instance_id).await {
                warn!("TTL pass for {} failed: {}", instance_id, e);
            }
        });
    }

    fn mark_unhealthy(&self, instance_id: &str) {
        self.inner.instances.write().remove(instance_id);
        debug!("Stopped TTL check for {}", instance_id);

        let worker = self.clone();
        let instance_id = instance_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = worker.inner.client.check_fail(&instance_id).await {
                warn!("TTL fail for {} not delivered: {}", instance_id, e);
            }
        });
    }
}

fn pulse_interval(ttl_secs: u64) -> Duration {
    Duration::from_secs((ttl_secs / 3).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsulConfig;

    fn make_heartbeat() -> ConsulHeartbeat {
        // Nothing listens on this port; spawned check calls fail fast and
        // only the bookkeeping is observed.
        let config = ConsulConfig {
            url: "http://127.0.0.1:1".to_string(),
            request_timeout_secs: 1,
            check_ttl_secs: 10,
            ..ConsulConfig::default()
        };
        let client = Arc::new(ConsulClient::new(config).unwrap());
        ConsulHeartbeat::start(client)
    }

    #[test]
    fn test_pulse_interval_is_a_third_of_the_ttl() {
        assert_eq!(pulse_interval(10), Duration::from_secs(3));
        assert_eq!(pulse_interval(60), Duration::from_secs(20));
        // Tiny TTLs still pulse at least once a second.
        assert_eq!(pulse_interval(2), Duration::from_secs(1));
        assert_eq!(pulse_interval(0), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_tracking_follows_health_marks() {
        let heartbeat = make_heartbeat();
        assert!(heartbeat.tracked().is_empty());

        heartbeat.mark_healthy("orders-1");
        heartbeat.mark_healthy("orders-2");
        heartbeat.mark_healthy("orders-1");
        assert_eq!(heartbeat.tracked(), vec!["orders-1", "orders-2"]);

        heartbeat.mark_unhealthy("orders-1");
        assert_eq!(heartbeat.tracked(), vec!["orders-2"]);

        heartbeat.mark_unhealthy("never-registered");
        assert_eq!(heartbeat.tracked(), vec!["orders-2"]);
    }

    #[tokio::test]
    async fn test_enable_switch() {
        let heartbeat = make_heartbeat();
        assert!(heartbeat.is_enabled());
        heartbeat.set_enabled(false);
        assert!(!heartbeat.is_enabled());
        heartbeat.set_enabled(true);
        assert!(heartbeat.is_enabled());
    }
}
