//! Collaborator seams: the registry wire client and the heartbeat reporter

use crate::error::RegistryError;
use crate::record::{RegistryRecord, RegistryResponse};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Wire-level access to the remote service registry.
///
/// `last_index == 0` asks for an immediate snapshot of whatever the registry
/// currently holds; a non-zero index asks the registry to hold the request
/// open until its index moves past that value or a server-side timeout
/// fires. Implementations decide how long that hold may last.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn query(
        &self,
        service: &str,
        last_index: u64,
    ) -> Result<RegistryResponse, RegistryError>;

    async fn register_instance(&self, record: &RegistryRecord) -> Result<(), RegistryError>;

    async fn deregister_instance(&self, instance_id: &str) -> Result<(), RegistryError>;
}

/// Keeps this process's own registrations marked alive in the registry.
/// The discovery core only toggles instances in and out of reporting; the
/// actual health protocol lives in the implementation.
pub trait HeartbeatReporter: Send + Sync {
    fn mark_healthy(&self, instance_id: &str);
    fn mark_unhealthy(&self, instance_id: &str);
}

/// An in-memory registry for tests and fixed topologies.
///
/// Queries return immediately regardless of `last_index`; every mutation
/// bumps the consistency index, so a directory polling against it observes
/// changes exactly as it would against a remote registry.
#[derive(Default)]
pub struct StaticRegistry {
    state: RwLock<StaticState>,
}

#[derive(Default)]
struct StaticState {
    services: HashMap<String, Vec<RegistryRecord>>,
    index: u64,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the record set for `service` and advances the index.
    pub fn set_records(&self, service: &str, records: Vec<RegistryRecord>) {
        let mut state = self.state.write();
        state.services.insert(service.to_string(), records);
        state.index += 1;
    }

    /// Current consistency index.
    pub fn index(&self) -> u64 {
        self.state.read().index
    }
}

#[async_trait]
impl RegistryClient for StaticRegistry {
    async fn query(
        &self,
        service: &str,
        _last_index: u64,
    ) -> Result<RegistryResponse, RegistryError> {
        let state = self.state.read();
        Ok(RegistryResponse::new(
            state.services.get(service).cloned().unwrap_or_default(),
            state.index,
        ))
    }

    async fn register_instance(&self, record: &RegistryRecord) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        let records = state.services.entry(record.service.clone()).or_default();
        records.retain(|existing| existing.id != record.id);
        records.push(record.clone());
        state.index += 1;
        Ok(())
    }

    async fn deregister_instance(&self, instance_id: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        for records in state.services.values_mut() {
            records.retain(|existing| existing.id != instance_id);
        }
        state.index += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(id: &str) -> RegistryRecord {
        RegistryRecord::new(id, "orders", "10.0.0.1", 8080)
    }

    #[tokio::test]
    async fn test_query_unknown_service_is_empty() {
        let registry = StaticRegistry::new();
        let response = registry.query("orders", 0).await.unwrap();
        assert!(response.records.is_empty());
        assert_eq!(response.index, 0);
    }

    #[tokio::test]
    async fn test_mutations_advance_the_index() {
        let registry = StaticRegistry::new();
        assert_eq!(registry.index(), 0);

        registry.set_records("orders", vec![make_record("orders-1")]);
        let first = registry.query("orders", 0).await.unwrap();
        assert_eq!(first.records.len(), 1);
        assert_eq!(first.index, registry.index());

        registry.set_records("orders", vec![make_record("orders-1"), make_record("orders-2")]);
        let second = registry.query("orders", first.index).await.unwrap();
        assert!(second.index > first.index);
        assert_eq!(second.records.len(), 2);
        assert_eq!(registry.index(), 2);
    }

    #[tokio::test]
    async fn test_register_replaces_by_id() {
        let registry = StaticRegistry::new();
        registry.register_instance(&make_record("orders-1")).await.unwrap();
        let mut updated = make_record("orders-1");
        updated.port = 9090;
        registry.register_instance(&updated).await.unwrap();

        let response = registry.query("orders", 0).await.unwrap();
        assert_eq!(response.records.len(), 1);
        assert_eq!(response.records[0].port, 9090);
    }

    #[tokio::test]
    async fn test_deregister_removes_the_instance() {
        let registry = StaticRegistry::new();
        registry.register_instance(&make_record("orders-1")).await.unwrap();
        registry.deregister_instance("orders-1").await.unwrap();
        let response = registry.query("orders", 0).await.unwrap();
        assert!(response.records.is_empty());
    }
}
