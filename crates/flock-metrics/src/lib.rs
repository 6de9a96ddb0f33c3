//! flock-metrics: observability for the flock control plane.
//!
//! Counts what the control loops and the dispatcher do (dispatches,
//! completions, launches, terminations, probe failures, accounting bugs)
//! and renders those counters plus the current fleet census in the
//! Prometheus text exposition format.
//!
//! # Architecture
//!
//! ```text
//! FleetMetrics (Arc, lock-free atomics)
//!   ├── Dispatcher      → dispatch / completion / over-release counters
//!   ├── Autoscaler      → launch / terminate counters
//!   ├── HealthMonitor   → probe failure / eviction counters
//!   └── snapshot() → MetricsSnapshot
//!
//! render_prometheus(snapshot, census, workers) → text/plain for /metrics
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{Counter, FleetMetrics, Gauge, MetricsSnapshot};
pub use prometheus::render_prometheus;
