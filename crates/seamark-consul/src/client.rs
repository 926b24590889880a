//! Consul HTTP API client

use crate::config::ConsulConfig;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::HeaderMap;
use seamark_core::{HealthStatus, RegistryClient, RegistryError, RegistryRecord, RegistryResponse};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Client for a Consul agent's HTTP API.
///
/// Health queries use Consul's blocking-query protocol: a query carrying a
/// non-zero index is held open by the agent until the service changes or the
/// configured wait expires, while an index of zero returns immediately.
pub struct ConsulClient {
    config: ConsulConfig,
    client: Client,
}

/// One entry of a /v1/health/service response.
#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Node")]
    node: NodeInfo,
    #[serde(rename = "Service")]
    service: AgentService,
    #[serde(rename = "Checks", default)]
    checks: Vec<CheckInfo>,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(rename = "Address", default)]
    address: String,
}

#[derive(Debug, Deserialize)]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "Tags", default)]
    tags: Option<Vec<String>>,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

#[derive(Debug, Deserialize)]
struct CheckInfo {
    #[serde(rename = "Status", default)]
    status: String,
}

/// Body of a /v1/agent/service/register call.
#[derive(Debug, Serialize)]
struct RegisterPayload {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Tags")]
    tags: Vec<String>,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Check", skip_serializing_if = "Option::is_none")]
    check: Option<CheckPayload>,
}

#[derive(Debug, Serialize)]
struct CheckPayload {
    #[serde(rename = "DeregisterCriticalServiceAfter")]
    deregister_after: String,
    #[serde(rename = "TTL")]
    ttl: String,
}

impl ConsulClient {
    /// Create a new Consul client
    pub fn new(config: ConsulConfig) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .build()
            .map_err(|e| RegistryError::Request(format!("failed to build HTTP client: {}", e)))?;

        info!("Created Consul client for {}", config.url);

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ConsulConfig {
        &self.config
    }

    /// Report the TTL check of a registered service as passing.
    pub async fn check_pass(&self, instance_id: &str) -> Result<(), RegistryError> {
        self.update_check(instance_id, "pass").await
    }

    /// Report the TTL check of a registered service as failing.
    pub async fn check_fail(&self, instance_id: &str) -> Result<(), RegistryError> {
        self.update_check(instance_id, "fail").await
    }

    async fn update_check(&self, instance_id: &str, state: &str) -> Result<(), RegistryError> {
        let url = format!(
            "{}/v1/agent/check/{}/service:{}",
            self.config.url, state, instance_id
        );

        debug!("Updating check: {}", url);

        let mut request = self.client.put(&url).timeout(self.config.request_timeout());
        if let Some(token) = &self.config.token {
            request = request.header("X-Consul-Token", token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            return Err(RegistryError::Request(format!(
                "check {} for {} returned {}",
                state, instance_id, status
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl RegistryClient for ConsulClient {
    async fn query(
        &self,
        service: &str,
        last_index: u64,
    ) -> Result<RegistryResponse, RegistryError> {
        let url = health_url(&self.config.url, service, last_index, self.config.wait_secs);
        let timeout = if last_index > 0 {
            self.config.blocking_timeout()
        } else {
            self.config.request_timeout()
        };

        debug!("Health query: {}", url);

        let mut request = self.client.get(&url).timeout(timeout);
        if let Some(token) = &self.config.token {
            request = request.header("X-Consul-Token", token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            return Err(RegistryError::Request(format!(
                "health query for {} returned {}",
                service, status
            )));
        }

        let index = parse_index(response.headers())?;
        let entries: Vec<HealthEntry> = response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))?;

        let records = entries.into_iter().map(to_record).collect();
        Ok(RegistryResponse::new(records, index))
    }

    async fn register_instance(&self, record: &RegistryRecord) -> Result<(), RegistryError> {
        let url = format!("{}/v1/agent/service/register", self.config.url);
        let payload = register_payload(record, &self.config);

        debug!("Registering {} at {}", record.id, url);

        let mut request = self
            .client
            .put(&url)
            .json(&payload)
            .timeout(self.config.request_timeout());
        if let Some(token) = &self.config.token {
            request = request.header("X-Consul-Token", token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            return Err(RegistryError::Request(format!(
                "register for {} returned {}",
                record.id, status
            )));
        }

        Ok(())
    }

    async fn deregister_instance(&self, instance_id: &str) -> Result<(), RegistryError> {
        let url = format!(
            "{}/v1/agent/service/deregister/{}",
            self.config.url, instance_id
        );

        debug!("Deregistering {} at {}", instance_id, url);

        let mut request = self.client.put(&url).timeout(self.config.request_timeout());
        if let Some(token) = &self.config.token {
            request = request.header("X-Consul-Token", token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            return Err(RegistryError::Request(format!(
                "deregister for {} returned {}",
                instance_id, status
            )));
        }

        Ok(())
    }
}

/// Build the health endpoint URL. Only queries that resume from a known
/// index carry the blocking parameters; an index of zero asks for an
/// immediate snapshot.
fn health_url(base: &str, service: &str, last_index: u64, wait_secs: u64) -> String {
    let mut url = format!("{}/v1/health/service/{}?passing=true", base, service);
    if last_index > 0 {
        url.push_str(&format!("&index={}&wait={}s", last_index, wait_secs));
    }
    url
}

/// Extract the consistency index Consul attaches to health responses.
fn parse_index(headers: &HeaderMap) -> Result<u64, RegistryError> {
    headers
        .get("X-Consul-Index")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            RegistryError::InvalidResponse("missing or malformed X-Consul-Index header".to_string())
        })
}

fn to_record(entry: HealthEntry) -> RegistryRecord {
    // Services registered without an address inherit the node's.
    let address = if entry.service.address.is_empty() {
        entry.node.address
    } else {
        entry.service.address
    };

    RegistryRecord {
        id: entry.service.id,
        service: entry.service.service,
        address,
        port: entry.service.port,
        tags: entry.service.tags.unwrap_or_default(),
        status: aggregate_status(&entry.checks),
    }
}

/// The worst individual check wins: one critical check makes the whole
/// instance critical regardless of the others.
fn aggregate_status(checks: &[CheckInfo]) -> HealthStatus {
    let mut status = HealthStatus::Passing;
    for check in checks {
        match check.status.as_str() {
            "critical" => return HealthStatus::Critical,
            "warning" => status = HealthStatus::Warning,
            _ => {}
        }
    }
    status
}

fn register_payload(record: &RegistryRecord, config: &ConsulConfig) -> RegisterPayload {
    let check = config.check_ttl_enabled().then(|| CheckPayload {
        deregister_after: format!("{}s", config.deregister_after_secs),
        ttl: format!("{}s", config.check_ttl_secs),
    });

    RegisterPayload {
        id: record.id.clone(),
        name: record.service.clone(),
        tags: record.tags.clone(),
        address: record.address.clone(),
        port: record.port,
        check,
    }
}

fn transport_error(e: reqwest::Error) -> RegistryError {
    if e.is_connect() || e.is_timeout() {
        RegistryError::Unavailable(e.to_string())
    } else {
        RegistryError::Request(e.to_string())
    }
}
