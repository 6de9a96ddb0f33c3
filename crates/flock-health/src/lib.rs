//! flock-health: health checking and self-healing for the worker fleet.
//!
//! Provides the HTTP [`HealthPort`](flock_core::HealthPort) adapter and the
//! [`HealthMonitor`] tick loop that walks every worker through its
//! lifecycle.
//!
//! # Architecture
//!
//! ```text
//! HealthMonitor::tick()
//!   ├── snapshot non-Terminating workers from FleetRegistry
//!   └── per worker (bounded fan-out)
//!       ├── Provisioning/Initializing without endpoint
//!       │     └── ProvisioningPort::status + get_endpoint → Initializing
//!       ├── endpoint known → HealthPort::health_check
//!       │     └── FleetRegistry::record_probe (debounced Ready/Unhealthy)
//!       └── Unhealthy past grace, or stuck Provisioning → remove + terminate
//! ```
//!
//! # Debounce
//!
//! A worker flips to `Unhealthy` only once `max_consecutive_failures`
//! probes in a row have failed. A single success restores `Ready`.
//! Probe errors and timeouts count as failures.

pub mod checker;
pub mod monitor;

pub use checker::{HttpHealthPort, http_probe};
pub use monitor::{HealthMonitor, HealthTick};
