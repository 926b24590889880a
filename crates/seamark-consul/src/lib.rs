//! Seamark Consul Backend
//!
//! This crate provides the Consul-backed registry client for Seamark,
//! implementing blocking health queries, agent service registration and
//! TTL check heartbeating over the Consul HTTP API.

pub mod client;
pub mod config;
pub mod heartbeat;

pub use client::ConsulClient;
pub use config::ConsulConfig;
pub use heartbeat::ConsulHeartbeat;
