//! Counters exposed by the discovery engine

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counter block updated by the directory and its background tasks.
/// The same events are also emitted through the `metrics` facade; these
/// atomics exist so embedders and tests can read them without a recorder.
#[derive(Debug, Default)]
pub struct DiscoveryStats {
    pub(crate) loops_started: AtomicU64,
    pub(crate) cache_refreshes: AtomicU64,
    pub(crate) lookup_failures: AtomicU64,
    pub(crate) notifications_queued: AtomicU64,
    pub(crate) notifications_dropped: AtomicU64,
    pub(crate) notifications_delivered: AtomicU64,
}

impl DiscoveryStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            loops_started: self.loops_started.load(Ordering::Relaxed),
            cache_refreshes: self.cache_refreshes.load(Ordering::Relaxed),
            lookup_failures: self.lookup_failures.load(Ordering::Relaxed),
            notifications_queued: self.notifications_queued.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [DiscoveryStats].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Background polling loops spawned so far.
    pub loops_started: u64,
    /// Cache entries replaced after a confirmed change.
    pub cache_refreshes: u64,
    /// Registry queries that errored (snapshot fetches and polls alike).
    pub lookup_failures: u64,
    /// Change events accepted into the notification queue.
    pub notifications_queued: u64,
    /// Change events rejected because the queue was full.
    pub notifications_dropped: u64,
    /// Change events fully delivered to their subscriber set.
    pub notifications_delivered: u64,
}
