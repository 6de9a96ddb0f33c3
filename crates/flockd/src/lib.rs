//! flockd: the flock daemon.
//!
//! Assembles the fleet subsystems into one process:
//! - Fleet registry (in memory)
//! - Provisioning backend (child processes, or in-memory for dry runs)
//! - Health monitor loop
//! - Autoscaler loop
//! - Dispatcher behind the admission API, plus Prometheus metrics
//!
//! ```text
//!                 ┌────────────── flockd ──────────────┐
//!  router ──HTTP──▶ api ──▶ Dispatcher ─┐              │
//!                 │                     ▼              │
//!                 │ HealthMonitor ──▶ FleetRegistry ◀── Autoscaler
//!                 │      │                              │     │
//!                 └──────┼──────────────────────────────┼─────┘
//!                        ▼                              ▼
//!                   HealthPort                   ProvisioningPort
//! ```

pub mod api;
pub mod daemon;
pub mod provisioner;

pub use api::{ApiState, build_router};
pub use daemon::{Fleet, load_config};
pub use provisioner::ProcessProvisioner;
