//! flock-state: the fleet registry.
//!
//! [`FleetRegistry`] is the single source of truth for every worker the
//! control plane knows about. It is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Mutex<..>>`) and is handed to the health monitor, the autoscaler,
//! and the dispatcher at construction time.
//!
//! # Concurrency
//!
//! Every operation is one critical section that never suspends, so
//! check-and-act sequences (`try_reserve`, `release`, probe folding, phase
//! transitions) are atomic with respect to each other. Readers get owned
//! snapshots, never references into the map.

pub mod error;
pub mod registry;
pub mod types;

pub use error::{RegistryError, RegistryResult};
pub use registry::{FleetRegistry, ProbeApplied};
pub use types::*;
