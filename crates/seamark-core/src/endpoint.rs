//! Endpoint and cluster identity types

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// One resolved network location for a logical service.
///
/// Identity is the full encoded form: two endpoints are equal only when
/// protocol, address, service path and every parameter match. Parameters are
/// kept in a `BTreeMap` so the encoded form is stable across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    /// Logical service name, used as the path component of the encoded form.
    pub service: String,
    /// Key/value parameters such as an environment tag.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl ServiceEndpoint {
    pub fn new(
        protocol: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        service: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            port,
            service: service.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Canonical `protocol://host:port/service?k=v` rendering.
    pub fn to_uri(&self) -> String {
        let mut uri = format!(
            "{}://{}:{}/{}",
            self.protocol, self.host, self.port, self.service
        );
        if !self.parameters.is_empty() {
            let query: Vec<String> = self
                .parameters
                .iter()
                .map(|(key, value)| {
                    if value.is_empty() {
                        key.clone()
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();
            uri.push('?');
            uri.push_str(&query.join("&"));
        }
        uri
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

/// Compares two endpoint lists as sets: same members, any order.
pub fn same_endpoint_set(a: &[ServiceEndpoint], b: &[ServiceEndpoint]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let members: HashSet<&ServiceEndpoint> = a.iter().collect();
    b.iter().all(|endpoint| members.contains(endpoint))
}

/// Grouping identity for a logical service, coarser than one concrete
/// endpoint. All subscribers of `protocol://service` share one callback set
/// and receive the same change events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterKey {
    pub protocol: String,
    pub service: String,
}

impl ClusterKey {
    pub fn new(protocol: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            service: service.into(),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

impl fmt::Display for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.protocol, self.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_endpoint(host: &str, port: u16) -> ServiceEndpoint {
        ServiceEndpoint::new("http", host, port, "orders")
    }

    #[test]
    fn test_uri_rendering() {
        let endpoint = make_endpoint("10.0.0.1", 8080)
            .with_parameter("environment", "prod")
            .with_parameter("zone", "a");
        assert_eq!(
            endpoint.to_uri(),
            "http://10.0.0.1:8080/orders?environment=prod&zone=a"
        );
    }

    #[test]
    fn test_uri_rendering_without_parameters() {
        assert_eq!(make_endpoint("10.0.0.1", 8080).to_uri(), "http://10.0.0.1:8080/orders");
    }

    #[test]
    fn test_empty_parameter_renders_as_flag() {
        let endpoint = make_endpoint("10.0.0.1", 8080).with_parameter("secure", "");
        assert_eq!(endpoint.to_uri(), "http://10.0.0.1:8080/orders?secure");
    }

    #[test]
    fn test_set_equality_ignores_order() {
        let a = vec![make_endpoint("10.0.0.1", 8080), make_endpoint("10.0.0.2", 8080)];
        let b = vec![make_endpoint("10.0.0.2", 8080), make_endpoint("10.0.0.1", 8080)];
        assert!(same_endpoint_set(&a, &b));
    }

    #[test]
    fn test_set_equality_detects_membership_change() {
        let a = vec![make_endpoint("10.0.0.1", 8080)];
        let b = vec![make_endpoint("10.0.0.1", 8080), make_endpoint("10.0.0.2", 8080)];
        assert!(!same_endpoint_set(&a, &b));
        assert!(!same_endpoint_set(&b, &a));
    }

    #[test]
    fn test_parameters_are_part_of_identity() {
        let plain = vec![make_endpoint("10.0.0.1", 8080)];
        let tagged = vec![make_endpoint("10.0.0.1", 8080).with_parameter("environment", "prod")];
        assert!(!same_endpoint_set(&plain, &tagged));
    }

    #[test]
    fn test_empty_lists_are_equal() {
        assert!(same_endpoint_set(&[], &[]));
    }

    #[test]
    fn test_cluster_key_display() {
        assert_eq!(ClusterKey::new("https", "orders").to_string(), "https://orders");
    }
}
