//! Subscriber bookkeeping and change callbacks

use crate::endpoint::{ClusterKey, ServiceEndpoint};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Receives the full replacement endpoint list after a confirmed change.
///
/// Callbacks run on the shared notification pool, so they should be quick or
/// hand off internally. A returned error is logged and isolated to this
/// subscriber; the event is still delivered to everyone else.
pub trait ChangeListener: Send + Sync {
    fn endpoints_changed(
        &self,
        cluster: &ClusterKey,
        endpoints: &[ServiceEndpoint],
    ) -> anyhow::Result<()>;
}

type ListenerMap = HashMap<String, Arc<dyn ChangeListener>>;

/// Callback registry keyed by cluster.
///
/// Each cluster's callback map sits behind its own lock, so subscribing to
/// one service never contends with mutations on another. The `subscribed`
/// set holds every (cluster, subscriber) pair ever accepted and still
/// active; it is what makes duplicate subscribes no-ops.
#[derive(Default)]
pub struct Subscriptions {
    clusters: RwLock<HashMap<ClusterKey, Arc<Mutex<ListenerMap>>>>,
    subscribed: Mutex<HashSet<(ClusterKey, String)>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `listener` for `(cluster, subscriber)`. The first registration
    /// wins; repeated calls for the same pair change nothing. Returns whether
    /// a new subscription was created.
    pub fn subscribe(
        &self,
        cluster: &ClusterKey,
        subscriber: &str,
        listener: Arc<dyn ChangeListener>,
    ) -> bool {
        {
            let mut subscribed = self.subscribed.lock();
            if !subscribed.insert((cluster.clone(), subscriber.to_string())) {
                debug!("{} is already subscribed to {}", subscriber, cluster);
                return false;
            }
        }

        let slot = {
            let mut clusters = self.clusters.write();
            clusters.entry(cluster.clone()).or_default().clone()
        };
        slot.lock().insert(subscriber.to_string(), listener);
        true
    }

    /// Removes the callback for `(cluster, subscriber)`. Unknown pairs are
    /// ignored. The listener entry goes before the subscribed entry so a
    /// racing subscribe cannot end up tracked without a callback.
    pub fn unsubscribe(&self, cluster: &ClusterKey, subscriber: &str) {
        let slot = self.clusters.read().get(cluster).cloned();
        if let Some(slot) = slot {
            slot.lock().remove(subscriber);
        }
        self.subscribed
            .lock()
            .remove(&(cluster.clone(), subscriber.to_string()));
    }

    /// Snapshot of the current listeners for `cluster`, taken for delivery.
    /// Invocation happens outside any subscription lock.
    pub fn listeners_for(&self, cluster: &ClusterKey) -> Vec<(String, Arc<dyn ChangeListener>)> {
        let slot = self.clusters.read().get(cluster).cloned();
        match slot {
            Some(slot) => slot
                .lock()
                .iter()
                .map(|(subscriber, listener)| (subscriber.clone(), listener.clone()))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of callbacks currently registered under `cluster`.
    pub fn subscriber_count(&self, cluster: &ClusterKey) -> usize {
        match self.clusters.read().get(cluster) {
            Some(slot) => slot.lock().len(),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingListener {
        calls: Arc<AtomicU64>,
    }

    impl ChangeListener for CountingListener {
        fn endpoints_changed(
            &self,
            _cluster: &ClusterKey,
            _endpoints: &[ServiceEndpoint],
        ) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn make_listener() -> (Arc<dyn ChangeListener>, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        (Arc::new(CountingListener { calls: calls.clone() }), calls)
    }

    fn orders() -> ClusterKey {
        ClusterKey::new("http", "orders")
    }

    #[test]
    fn test_subscribe_is_idempotent_and_keeps_the_first_callback() {
        let subscriptions = Subscriptions::new();
        let (first, first_calls) = make_listener();
        let (second, second_calls) = make_listener();

        assert!(subscriptions.subscribe(&orders(), "client-a", first));
        assert!(!subscriptions.subscribe(&orders(), "client-a", second));
        assert_eq!(subscriptions.subscriber_count(&orders()), 1);

        for (_, listener) in subscriptions.listeners_for(&orders()) {
            listener.endpoints_changed(&orders(), &[]).unwrap();
        }
        assert_eq!(first_calls.load(Ordering::Relaxed), 1);
        assert_eq!(second_calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_unsubscribe_unknown_pair_is_a_noop() {
        let subscriptions = Subscriptions::new();
        subscriptions.unsubscribe(&orders(), "nobody");
        assert_eq!(subscriptions.subscriber_count(&orders()), 0);
    }

    #[test]
    fn test_resubscribe_after_unsubscribe_takes_effect() {
        let subscriptions = Subscriptions::new();
        let (first, _) = make_listener();
        let (second, second_calls) = make_listener();

        assert!(subscriptions.subscribe(&orders(), "client-a", first));
        subscriptions.unsubscribe(&orders(), "client-a");
        assert_eq!(subscriptions.subscriber_count(&orders()), 0);

        assert!(subscriptions.subscribe(&orders(), "client-a", second));
        for (_, listener) in subscriptions.listeners_for(&orders()) {
            listener.endpoints_changed(&orders(), &[]).unwrap();
        }
        assert_eq!(second_calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_clusters_are_independent() {
        let subscriptions = Subscriptions::new();
        let (listener, _) = make_listener();
        subscriptions.subscribe(&orders(), "client-a", listener);

        let payments = ClusterKey::new("http", "payments");
        assert_eq!(subscriptions.subscriber_count(&payments), 0);
        assert!(subscriptions.listeners_for(&payments).is_empty());
        assert_eq!(subscriptions.subscriber_count(&orders()), 1);
    }
}
