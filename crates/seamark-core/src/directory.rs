//! Process-local mirror of a remote service registry
//!
//! The [ServiceDirectory] answers endpoint lookups from memory, keeps each
//! looked-up service fresh through its own background polling loop, and fans
//! confirmed changes out to subscribers via a bounded notification pool.

use crate::client::{HeartbeatReporter, RegistryClient};
use crate::config::DiscoveryConfig;
use crate::endpoint::{ClusterKey, ServiceEndpoint, same_endpoint_set};
use crate::error::DiscoveryError;
use crate::notify::NotifyPool;
use crate::record::{RegistryRecord, RegistryResponse};
use crate::stats::{DiscoveryStats, StatsSnapshot};
use crate::subscription::{ChangeListener, Subscriptions};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

/// Outcome of applying one registry response to local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Updated,
    Unchanged,
    Stale,
}

/// Local directory of services, backed by a remote registry.
///
/// Cheap to clone; all clones share one cache, cursor table, subscription
/// registry and notification pool. Each distinct service name gets at most
/// one background polling task, which lives for the rest of the process.
#[derive(Clone)]
pub struct ServiceDirectory {
    inner: Arc<DirectoryInner>,
}

struct DirectoryInner {
    client: Arc<dyn RegistryClient>,
    heartbeat: Option<Arc<dyn HeartbeatReporter>>,
    config: DiscoveryConfig,
    /// service name -> current endpoint list, replaced wholesale on change.
    cache: RwLock<HashMap<String, Arc<Vec<ServiceEndpoint>>>>,
    /// service name -> last consistency index acted on. The entry existing
    /// at all is the claim that a polling loop runs for that name.
    cursors: RwLock<HashMap<String, u64>>,
    /// Per-service critical sections collapsing concurrent first fetches.
    fetch_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    subscriptions: Arc<Subscriptions>,
    notifier: NotifyPool,
    stats: Arc<DiscoveryStats>,
}

impl ServiceDirectory {
    /// Creates a directory backed by `client`. Requires a running tokio
    /// runtime; polling loops and notification deliveries are spawned on it.
    pub fn new(
        client: Arc<dyn RegistryClient>,
        heartbeat: Option<Arc<dyn HeartbeatReporter>>,
        config: DiscoveryConfig,
    ) -> Self {
        let subscriptions = Arc::new(Subscriptions::new());
        let stats = Arc::new(DiscoveryStats::default());
        let notifier = NotifyPool::start(
            subscriptions.clone(),
            stats.clone(),
            config.notify_workers,
            config.notify_queue,
        );
        info!(
            "Service directory ready (poll interval: {}s, notify queue: {})",
            config.lookup_interval_secs, config.notify_queue
        );
        Self {
            inner: Arc::new(DirectoryInner {
                client,
                heartbeat,
                config,
                cache: RwLock::new(HashMap::new()),
                cursors: RwLock::new(HashMap::new()),
                fetch_locks: Mutex::new(HashMap::new()),
                subscriptions,
                notifier,
                stats,
            }),
        }
    }

    /// Returns the current endpoint list for `service`.
    ///
    /// Only the first discovery of a name touches the registry: a single
    /// snapshot fetch populates the cache while concurrent resolvers for the
    /// same name wait on its lock instead of fetching again, and a polling
    /// loop is started to track the name from then on. An empty list means
    /// "no instances known", never an error; a failed fetch also degrades to
    /// the current (typically empty) cache content.
    pub async fn resolve(&self, service: &str) -> Arc<Vec<ServiceEndpoint>> {
        if let Some(endpoints) = self.cached(service)
            && !endpoints.is_empty()
        {
            return endpoints;
        }

        let lock = self.fetch_lock(service);
        let guard = lock.lock().await;

        // The fetch may have happened while waiting for the lock.
        if let Some(endpoints) = self.cached(service)
            && !endpoints.is_empty()
        {
            return endpoints;
        }

        let cluster = ClusterKey::new(&self.inner.config.default_protocol, service);
        match self.inner.client.query(service, 0).await {
            Ok(response) => {
                debug!(
                    "Snapshot for {} returned {} record(s) at index {}",
                    service,
                    response.records.len(),
                    response.index
                );
                let endpoints = build_endpoints(&cluster, &response);
                self.apply_endpoints(&cluster, endpoints, false);
            }
            Err(e) => {
                self.record_lookup_failure();
                warn!("Snapshot fetch for {} failed: {}", service, e);
            }
        }
        drop(guard);

        self.ensure_polling(&self.inner.config.default_protocol, service);
        self.cached(service).unwrap_or_default()
    }

    /// Starts the background polling loop for `service` unless one already
    /// runs. The zero cursor inserted here is the claim: whoever performs
    /// the insert spawns the loop, every later caller sees the entry and
    /// backs off, so N concurrent calls still produce exactly one loop.
    pub fn ensure_polling(&self, protocol: &str, service: &str) {
        {
            let mut cursors = self.inner.cursors.write();
            match cursors.entry(service.to_string()) {
                Entry::Occupied(_) => return,
                Entry::Vacant(slot) => {
                    slot.insert(0);
                }
            }
        }

        self.inner.stats.loops_started.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("seamark_poll_loops_started_total").increment(1);
        info!("Starting poll loop for {} ({})", service, protocol);

        let directory = self.clone();
        let cluster = ClusterKey::new(protocol, service);
        tokio::spawn(async move {
            directory.run_poll_loop(cluster).await;
        });
    }

    /// Registers `listener` for changes to `cluster` and makes sure the
    /// underlying service is being polled. The first registration for a
    /// (cluster, subscriber) pair wins; duplicates are no-ops.
    pub fn subscribe(&self, cluster: &ClusterKey, subscriber: &str, listener: Arc<dyn ChangeListener>) {
        if self.inner.subscriptions.subscribe(cluster, subscriber, listener) {
            debug!("Subscribed {} to {}", subscriber, cluster);
        }
        self.ensure_polling(cluster.protocol(), cluster.service());
    }

    /// Drops the callback registered by `subscriber` for `cluster`, if any.
    /// Polling for the service continues regardless.
    pub fn unsubscribe(&self, cluster: &ClusterKey, subscriber: &str) {
        self.inner.subscriptions.unsubscribe(cluster, subscriber);
        debug!("Unsubscribed {} from {}", subscriber, cluster);
    }

    /// Writes `record` into the remote registry and begins reporting the
    /// instance healthy.
    pub async fn register(&self, record: &RegistryRecord) -> Result<(), DiscoveryError> {
        self.inner.client.register_instance(record).await?;
        info!("Registered instance {} for {}", record.id, record.service);
        if let Some(heartbeat) = &self.inner.heartbeat {
            heartbeat.mark_healthy(&record.id);
        }
        Ok(())
    }

    /// Stops health reporting for the instance and removes it from the
    /// remote registry.
    pub async fn deregister(&self, instance_id: &str) -> Result<(), DiscoveryError> {
        if let Some(heartbeat) = &self.inner.heartbeat {
            heartbeat.mark_unhealthy(instance_id);
        }
        self.inner.client.deregister_instance(instance_id).await?;
        info!("Deregistered instance {}", instance_id);
        Ok(())
    }

    /// Current cache entry for `service`, if the name was ever resolved.
    pub fn cached(&self, service: &str) -> Option<Arc<Vec<ServiceEndpoint>>> {
        self.inner.cache.read().get(service).cloned()
    }

    /// Number of callbacks currently registered under `cluster`.
    pub fn subscriber_count(&self, cluster: &ClusterKey) -> usize {
        self.inner.subscriptions.subscriber_count(cluster)
    }

    /// Point-in-time counters for monitoring and tests.
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Poll, apply, sleep, forever. Query errors are absorbed with a short
    /// fixed delay so a registry outage can never kill the loop.
    async fn run_poll_loop(&self, cluster: ClusterKey) {
        let interval = self.inner.config.lookup_interval();
        let retry_delay = self.inner.config.retry_delay();
        loop {
            tokio::time::sleep(interval).await;
            let cursor = self.cursor(cluster.service());
            match self.inner.client.query(cluster.service(), cursor).await {
                Ok(response) => {
                    self.apply_response(&cluster, cursor, &response);
                }
                Err(e) => {
                    self.record_lookup_failure();
                    warn!("Poll for {} failed: {}", cluster.service(), e);
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    /// Applies one registry response for `cluster`, queried at `cursor`.
    fn apply_response(
        &self,
        cluster: &ClusterKey,
        cursor: u64,
        response: &RegistryResponse,
    ) -> PollOutcome {
        let service = cluster.service();
        if response.index > cursor && !response.records.is_empty() {
            debug!(
                "Index for {} advanced from {} to {}",
                service, cursor, response.index
            );
            let endpoints = build_endpoints(cluster, response);
            self.set_cursor(service, response.index);
            self.apply_endpoints(cluster, endpoints, true);
            PollOutcome::Updated
        } else if response.index < cursor {
            info!(
                "Registry index for {} went backwards ({} < {}), forcing full resync",
                service, response.index, cursor
            );
            self.set_cursor(service, 0);
            PollOutcome::Stale
        } else {
            debug!("No change for {} at index {}", service, cursor);
            PollOutcome::Unchanged
        }
    }

    /// Replaces the cache entry for the cluster's service when `endpoints`
    /// differs as a set from the current entry. An empty candidate never
    /// replaces existing state: a response whose records all failed
    /// conversion must not wipe a previously good list. Returns whether a
    /// replacement happened; with `notify` set, a replacement also fans the
    /// new list out to subscribers.
    fn apply_endpoints(
        &self,
        cluster: &ClusterKey,
        endpoints: Vec<ServiceEndpoint>,
        notify: bool,
    ) -> bool {
        let service = cluster.service();
        if endpoints.is_empty() {
            debug!("No usable endpoints for {}, keeping current entry", service);
            return false;
        }

        let replaced = {
            let mut cache = self.inner.cache.write();
            match cache.get(service) {
                Some(current) if same_endpoint_set(current, &endpoints) => None,
                _ => {
                    let endpoints = Arc::new(endpoints);
                    cache.insert(service.to_string(), endpoints.clone());
                    Some(endpoints)
                }
            }
        };

        match replaced {
            Some(endpoints) => {
                self.inner.stats.cache_refreshes.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("seamark_cache_refreshes_total").increment(1);
                info!("Endpoints for {} changed: {} instance(s)", service, endpoints.len());
                if notify {
                    self.inner.notifier.submit(cluster.clone(), endpoints);
                }
                true
            }
            None => {
                debug!("Endpoints for {} unchanged", service);
                false
            }
        }
    }

    fn fetch_lock(&self, service: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.inner.fetch_locks.lock();
        locks.entry(service.to_string()).or_default().clone()
    }

    fn cursor(&self, service: &str) -> u64 {
        self.inner.cursors.read().get(service).copied().unwrap_or(0)
    }

    fn set_cursor(&self, service: &str, index: u64) {
        self.inner.cursors.write().insert(service.to_string(), index);
    }

    fn record_lookup_failure(&self) {
        self.inner.stats.lookup_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("seamark_lookup_failures_total").increment(1);
    }
}

/// Maps a response's records to endpoints carrying the cluster's protocol.
/// Unavailable instances are skipped; records that fail conversion are
/// logged and dropped without aborting the batch.
fn build_endpoints(cluster: &ClusterKey, response: &RegistryResponse) -> Vec<ServiceEndpoint> {
    let mut endpoints = Vec::with_capacity(response.records.len());
    for record in &response.records {
        if !record.status.is_available() {
            debug!(
                "Skipping unavailable instance {} of {}",
                record.id,
                cluster.service()
            );
            continue;
        }
        match record.to_endpoint(cluster.protocol()) {
            Ok(endpoint) => endpoints.push(endpoint),
            Err(e) => warn!("Dropping record for {}: {}", cluster.service(), e),
        }
    }
    endpoints
}
