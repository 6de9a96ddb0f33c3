//! Error types for the flock ports and configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Transient failure from the provisioning backend.
///
/// Always contained within the tick that raised it; the next tick retries
/// whatever condition led to the call.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("launch failed for {worker_id}: {reason}")]
    Launch { worker_id: String, reason: String },

    #[error("terminate failed for {worker_id}: {reason}")]
    Terminate { worker_id: String, reason: String },

    #[error("status query failed for {worker_id}: {reason}")]
    Status { worker_id: String, reason: String },

    #[error("endpoint query failed for {worker_id}: {reason}")]
    Endpoint { worker_id: String, reason: String },

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
}

/// A health probe that could not produce an answer.
///
/// Callers treat every variant exactly like an unhealthy response.
#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("connect to {endpoint} failed: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("request to {endpoint} failed: {reason}")]
    Request { endpoint: String, reason: String },

    #[error("health check timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors loading or validating the fleet configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
