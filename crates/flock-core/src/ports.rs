//! Ports: the control plane's boundary with the compute backend and the
//! workers themselves.
//!
//! Both traits are object-safe so the daemon can hold them as
//! `Arc<dyn ...>` and tests can swap in the doubles from [`crate::memory`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{HealthCheckError, ProvisionError};

/// Opaque worker identifier, unique within a fleet.
pub type WorkerId = String;

/// Backend view of a worker's compute resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendStatus {
    /// Launch accepted, resource not up yet.
    Pending,
    /// Resource is up; an endpoint may be available.
    Running,
    /// The backend has no record of the worker.
    Unknown,
}

/// Creates, destroys, and inspects workers on the compute backend.
#[async_trait]
pub trait ProvisioningPort: Send + Sync {
    /// Request a new worker. Returning `Ok` means the backend accepted the
    /// launch, not that the worker is reachable.
    async fn launch(&self, worker_id: &str) -> Result<(), ProvisionError>;

    async fn terminate(&self, worker_id: &str) -> Result<(), ProvisionError>;

    async fn status(&self, worker_id: &str) -> Result<BackendStatus, ProvisionError>;

    /// Network address of the worker, once the backend knows it.
    async fn get_endpoint(&self, worker_id: &str) -> Result<Option<String>, ProvisionError>;
}

/// Liveness probe against a worker endpoint.
#[async_trait]
pub trait HealthPort: Send + Sync {
    /// `Ok(true)` for a healthy answer, `Ok(false)` for an unhealthy one.
    /// Callers treat `Err` the same as `Ok(false)`.
    async fn health_check(&self, endpoint: &str) -> Result<bool, HealthCheckError>;
}

/// Bound a provisioning call; expiry surfaces as [`ProvisionError::Timeout`].
pub async fn call_with_timeout<T, F>(
    limit: Duration,
    op: &'static str,
    fut: F,
) -> Result<T, ProvisionError>
where
    F: Future<Output = Result<T, ProvisionError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProvisionError::Timeout { op, after: limit }),
    }
}

/// Bound a health probe; expiry surfaces as [`HealthCheckError::Timeout`].
pub async fn probe_with_timeout(
    port: &dyn HealthPort,
    endpoint: &str,
    limit: Duration,
) -> Result<bool, HealthCheckError> {
    match tokio::time::timeout(limit, port.health_check(endpoint)).await {
        Ok(result) => result,
        Err(_) => Err(HealthCheckError::Timeout(limit)),
    }
}
