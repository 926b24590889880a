//! Error types for the discovery core

use thiserror::Error;

/// Errors surfaced by a registry client implementation.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Request(String),

    #[error("invalid registry response: {0}")]
    InvalidResponse(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Errors produced by the discovery core.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("invalid registry record: {0}")]
    InvalidRecord(String),
}
