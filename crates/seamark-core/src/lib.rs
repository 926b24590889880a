//! Seamark Core Discovery Logic
//!
//! This crate provides the core functionality for Seamark,
//! including the local endpoint cache, background registry polling,
//! and change notification to subscribers.

pub mod client;
pub mod config;
pub mod directory;
pub mod endpoint;
pub mod error;
pub mod record;
pub mod stats;
pub mod subscription;

mod notify;

pub use client::{HeartbeatReporter, RegistryClient, StaticRegistry};
pub use config::DiscoveryConfig;
pub use directory::ServiceDirectory;
pub use endpoint::{same_endpoint_set, ClusterKey, ServiceEndpoint};
pub use error::{DiscoveryError, RegistryError};
pub use record::{HealthStatus, RegistryRecord, RegistryResponse};
pub use stats::StatsSnapshot;
pub use subscription::{ChangeListener, Subscriptions};
