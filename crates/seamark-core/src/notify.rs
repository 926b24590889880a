//! Asynchronous delivery of endpoint-change events

use crate::endpoint::{ClusterKey, ServiceEndpoint};
use crate::stats::DiscoveryStats;
use crate::subscription::Subscriptions;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, warn};

struct Notification {
    cluster: ClusterKey,
    endpoints: Arc<Vec<ServiceEndpoint>>,
}

/// Bounded fan-out pool for subscriber callbacks.
///
/// Events enter through a bounded queue and are delivered by short-lived
/// tasks capped by a semaphore. A slow subscriber can therefore delay other
/// deliveries, but never the polling loops that produce the events, and the
/// number of events in flight inside the pool never exceeds queue capacity
/// plus the delivery ceiling.
pub(crate) struct NotifyPool {
    tx: mpsc::Sender<Notification>,
    stats: Arc<DiscoveryStats>,
}

impl NotifyPool {
    /// Spawns the pump task. Requires a running tokio runtime.
    pub(crate) fn start(
        subscriptions: Arc<Subscriptions>,
        stats: Arc<DiscoveryStats>,
        max_deliveries: usize,
        queue_capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Notification>(queue_capacity.max(1));
        let permits = Arc::new(Semaphore::new(max_deliveries.max(1)));
        let pool_stats = stats.clone();

        tokio::spawn(async move {
            loop {
                // Hold a permit before taking a job, so queued events stay
                // queued until a delivery slot is actually free.
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    break;
                };
                let Some(event) = rx.recv().await else {
                    break;
                };
                let subscriptions = subscriptions.clone();
                let stats = pool_stats.clone();
                tokio::spawn(async move {
                    deliver(&subscriptions, &stats, event);
                    drop(permit);
                });
            }
            debug!("Notification pump stopped");
        });

        Self { tx, stats }
    }

    /// Enqueues a change event without blocking. A full queue is surfaced
    /// through the dropped counter and an error log, never silently.
    pub(crate) fn submit(&self, cluster: ClusterKey, endpoints: Arc<Vec<ServiceEndpoint>>) {
        match self.tx.try_send(Notification { cluster, endpoints }) {
            Ok(()) => {
                self.stats.notifications_queued.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("seamark_notify_queued_total").increment(1);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.stats.notifications_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("seamark_notify_dropped_total").increment(1);
                error!(
                    "Notification queue full, dropping change event for {}",
                    event.cluster
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(
                    "Notification pump stopped, dropping change event for {}",
                    event.cluster
                );
            }
        }
    }
}

fn deliver(subscriptions: &Subscriptions, stats: &DiscoveryStats, event: Notification) {
    let listeners = subscriptions.listeners_for(&event.cluster);
    if listeners.is_empty() {
        debug!("No subscribers for {}", event.cluster);
    }
    for (subscriber, listener) in listeners {
        if let Err(e) = listener.endpoints_changed(&event.cluster, &event.endpoints) {
            warn!(
                "Subscriber {} failed to handle change for {}: {}",
                subscriber, event.cluster, e
            );
        }
    }
    stats.notifications_delivered.fetch_add(1, Ordering::Relaxed);
    metrics::counter!("seamark_notify_delivered_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::ServiceEndpoint;
    use crate::subscription::ChangeListener;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU64;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn orders() -> ClusterKey {
        ClusterKey::new("http", "orders")
    }

    fn make_endpoints() -> Arc<Vec<ServiceEndpoint>> {
        Arc::new(vec![ServiceEndpoint::new("http", "10.0.0.1", 8080, "orders")])
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    struct CountingListener {
        calls: Arc<AtomicU64>,
        fail: bool,
    }

    impl ChangeListener for CountingListener {
        fn endpoints_changed(
            &self,
            _cluster: &ClusterKey,
            _endpoints: &[ServiceEndpoint],
        ) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                anyhow::bail!("subscriber exploded");
            }
            Ok(())
        }
    }

    /// Signals entry, then blocks until released through the channel.
    struct GatedListener {
        entered: std_mpsc::Sender<()>,
        release: Mutex<std_mpsc::Receiver<()>>,
    }

    impl ChangeListener for GatedListener {
        fn endpoints_changed(
            &self,
            _cluster: &ClusterKey,
            _endpoints: &[ServiceEndpoint],
        ) -> anyhow::Result<()> {
            self.entered.send(()).ok();
            self.release
                .lock()
                .recv_timeout(Duration::from_secs(5))
                .ok();
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_failing_subscriber_does_not_block_the_rest() {
        let subscriptions = Arc::new(Subscriptions::new());
        let stats = Arc::new(DiscoveryStats::default());
        let failing_calls = Arc::new(AtomicU64::new(0));
        let healthy_calls = Arc::new(AtomicU64::new(0));
        subscriptions.subscribe(
            &orders(),
            "failing",
            Arc::new(CountingListener { calls: failing_calls.clone(), fail: true }),
        );
        subscriptions.subscribe(
            &orders(),
            "healthy",
            Arc::new(CountingListener { calls: healthy_calls.clone(), fail: false }),
        );

        let pool = NotifyPool::start(subscriptions, stats.clone(), 4, 16);
        pool.submit(orders(), make_endpoints());

        wait_until(|| stats.snapshot().notifications_delivered == 1).await;
        assert_eq!(failing_calls.load(Ordering::Relaxed), 1);
        assert_eq!(healthy_calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_full_queue_drops_and_counts_the_event() {
        let subscriptions = Arc::new(Subscriptions::new());
        let stats = Arc::new(DiscoveryStats::default());
        let (entered_tx, entered_rx) = std_mpsc::channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        subscriptions.subscribe(
            &orders(),
            "slow",
            Arc::new(GatedListener {
                entered: entered_tx,
                release: Mutex::new(release_rx),
            }),
        );

        // One delivery slot and one queue slot.
        let pool = NotifyPool::start(subscriptions, stats.clone(), 1, 1);

        pool.submit(orders(), make_endpoints());
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("first delivery never started");

        // The single delivery slot is busy, so this event stays queued and
        // the one after it has nowhere to go.
        pool.submit(orders(), make_endpoints());
        pool.submit(orders(), make_endpoints());

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.notifications_queued, 2);
        assert_eq!(snapshot.notifications_dropped, 1);

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        wait_until(|| stats.snapshot().notifications_delivered == 2).await;
        assert_eq!(stats.snapshot().notifications_dropped, 1);
    }

    #[tokio::test]
    async fn test_event_without_subscribers_is_silently_consumed() {
        let subscriptions = Arc::new(Subscriptions::new());
        let stats = Arc::new(DiscoveryStats::default());
        let pool = NotifyPool::start(subscriptions, stats.clone(), 2, 8);
        pool.submit(orders(), make_endpoints());
        wait_until(|| stats.snapshot().notifications_delivered == 1).await;
    }
}
