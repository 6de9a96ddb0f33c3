//! flock-core: shared vocabulary for the flock control plane.
//!
//! Holds the pieces every other flock crate agrees on:
//!
//! - [`FleetConfig`]: the TOML configuration surface and its startup
//!   validation
//! - [`ProvisioningPort`] / [`HealthPort`]: the only two seams through which
//!   the control plane touches the outside world
//! - [`ProvisionError`] / [`HealthCheckError`]: the transient backend errors
//!   those seams can raise
//! - [`memory`]: in-process port implementations used for dry runs and tests
//!
//! # Architecture
//!
//! ```text
//! Autoscaler ──launch/terminate──▶ ProvisioningPort ──▶ compute backend
//! HealthMonitor ──status/endpoint─▶ ProvisioningPort
//! HealthMonitor ──health_check───▶ HealthPort ──────▶ worker endpoint
//! ```

pub mod config;
pub mod duration;
pub mod error;
pub mod memory;
pub mod ports;

pub use config::{
    ApiConfig, AutoscaleConfig, DispatchConfig, FleetConfig, FleetSection, HealthConfig,
    ProvisionerConfig, ProvisionerKind,
};
pub use error::{ConfigError, HealthCheckError, ProvisionError};
pub use ports::{
    BackendStatus, HealthPort, ProvisioningPort, WorkerId, call_with_timeout, probe_with_timeout,
};
