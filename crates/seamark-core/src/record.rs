//! Raw registry records and their endpoint transform

use crate::endpoint::ServiceEndpoint;
use crate::error::DiscoveryError;
use serde::{Deserialize, Serialize};

/// Instance health as reported by the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Passing,
    Warning,
    Critical,
}

impl HealthStatus {
    /// Whether the instance should be handed out to callers. Warning still
    /// counts as available; only critical instances are withheld.
    pub fn is_available(&self) -> bool {
        matches!(self, HealthStatus::Passing | HealthStatus::Warning)
    }
}

/// One service instance as returned by the registry, before conversion into
/// a [ServiceEndpoint].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// Registry-unique instance identifier.
    pub id: String,
    pub service: String,
    pub address: String,
    pub port: u16,
    /// Free-form tags; `key=value` tags become endpoint parameters, bare
    /// tags become flag parameters with an empty value.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: HealthStatus,
}

impl RegistryRecord {
    pub fn new(
        id: impl Into<String>,
        service: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            address: address.into(),
            port,
            tags: Vec::new(),
            status: HealthStatus::Passing,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Pure conversion into an endpoint carrying `protocol`. Fails on records
    /// the registry should never have produced (no address, zero port);
    /// callers decide whether to drop the record or abort.
    pub fn to_endpoint(&self, protocol: &str) -> Result<ServiceEndpoint, DiscoveryError> {
        if self.address.is_empty() {
            return Err(DiscoveryError::InvalidRecord(format!(
                "instance {} of {} has no address",
                self.id, self.service
            )));
        }
        if self.port == 0 {
            return Err(DiscoveryError::InvalidRecord(format!(
                "instance {} of {} has no port",
                self.id, self.service
            )));
        }

        let mut endpoint = ServiceEndpoint::new(protocol, &self.address, self.port, &self.service);
        for tag in &self.tags {
            match tag.split_once('=') {
                Some((key, value)) => {
                    endpoint.parameters.insert(key.to_string(), value.to_string());
                }
                None => {
                    endpoint.parameters.insert(tag.clone(), String::new());
                }
            }
        }
        Ok(endpoint)
    }
}

/// A record list plus the consistency index the registry assigned to it.
/// An index equal to the last one observed means nothing changed in between.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryResponse {
    pub records: Vec<RegistryRecord>,
    pub index: u64,
}

impl RegistryResponse {
    pub fn new(records: Vec<RegistryRecord>, index: u64) -> Self {
        Self { records, index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_to_endpoint() {
        let record = RegistryRecord::new("orders-1", "orders", "10.0.0.1", 8080)
            .with_tag("environment=prod");
        let endpoint = record.to_endpoint("https").unwrap();
        assert_eq!(endpoint.to_uri(), "https://10.0.0.1:8080/orders?environment=prod");
    }

    #[test]
    fn test_bare_tag_becomes_flag_parameter() {
        let record = RegistryRecord::new("orders-1", "orders", "10.0.0.1", 8080).with_tag("canary");
        let endpoint = record.to_endpoint("http").unwrap();
        assert_eq!(endpoint.parameters.get("canary"), Some(&String::new()));
    }

    #[test]
    fn test_missing_address_is_rejected() {
        let record = RegistryRecord::new("orders-1", "orders", "", 8080);
        let err = record.to_endpoint("http").unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidRecord(_)));
    }

    #[test]
    fn test_zero_port_is_rejected() {
        let record = RegistryRecord::new("orders-1", "orders", "10.0.0.1", 0);
        let err = record.to_endpoint("http").unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidRecord(_)));
    }

    #[test]
    fn test_status_availability() {
        assert!(HealthStatus::Passing.is_available());
        assert!(HealthStatus::Warning.is_available());
        assert!(!HealthStatus::Critical.is_available());
    }
}
