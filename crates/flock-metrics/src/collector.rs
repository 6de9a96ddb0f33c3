//! Control-plane counters.
//!
//! Plain `AtomicU64`s: every component holds an `Arc<FleetMetrics>` and
//! bumps counters without coordination.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A last-value gauge holding an `f64`; unset until the first `set`.
#[derive(Debug)]
pub struct Gauge(AtomicU64);

impl Default for Gauge {
    fn default() -> Self {
        Self(AtomicU64::new(f64::NAN.to_bits()))
    }
}

impl Gauge {
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> Option<f64> {
        let value = f64::from_bits(self.0.load(Ordering::Relaxed));
        (!value.is_nan()).then_some(value)
    }
}

/// Counters shared by the dispatcher, autoscaler, and health monitor.
#[derive(Debug, Default)]
pub struct FleetMetrics {
    // Dispatcher.
    pub dispatch_assigned: Counter,
    pub dispatch_no_capacity: Counter,
    /// `try_reserve` lost a race after `pick_available`.
    pub dispatch_conflicts: Counter,
    pub completions_success: Counter,
    pub completions_failure: Counter,
    pub over_releases: Counter,
    /// Registry invariant violations surfaced by any component.
    pub registry_errors: Counter,

    // Autoscaler.
    pub launches: Counter,
    pub launch_failures: Counter,
    pub drains_completed: Counter,
    pub drains_forced: Counter,
    pub terminations: Counter,
    pub terminate_failures: Counter,

    // Health monitor.
    pub probe_failures: Counter,
    pub status_failures: Counter,
    pub evictions: Counter,
    pub provisioning_expired: Counter,
    /// Provisioning workers the backend stopped reporting.
    pub provisioning_lost: Counter,

    /// Published copy of the autoscaler's smoothed load.
    pub smoothed_load: Gauge,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub dispatch_assigned: u64,
    pub dispatch_no_capacity: u64,
    pub dispatch_conflicts: u64,
    pub completions_success: u64,
    pub completions_failure: u64,
    pub over_releases: u64,
    pub registry_errors: u64,
    pub launches: u64,
    pub launch_failures: u64,
    pub drains_completed: u64,
    pub drains_forced: u64,
    pub terminations: u64,
    pub terminate_failures: u64,
    pub probe_failures: u64,
    pub status_failures: u64,
    pub evictions: u64,
    pub provisioning_expired: u64,
    pub provisioning_lost: u64,
    pub smoothed_load: Option<f64>,
}

impl FleetMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatch_assigned: self.dispatch_assigned.get(),
            dispatch_no_capacity: self.dispatch_no_capacity.get(),
            dispatch_conflicts: self.dispatch_conflicts.get(),
            completions_success: self.completions_success.get(),
            completions_failure: self.completions_failure.get(),
            over_releases: self.over_releases.get(),
            registry_errors: self.registry_errors.get(),
            launches: self.launches.get(),
            launch_failures: self.launch_failures.get(),
            drains_completed: self.drains_completed.get(),
            drains_forced: self.drains_forced.get(),
            terminations: self.terminations.get(),
            terminate_failures: self.terminate_failures.get(),
            probe_failures: self.probe_failures.get(),
            status_failures: self.status_failures.get(),
            evictions: self.evictions.get(),
            provisioning_expired: self.provisioning_expired.get(),
            provisioning_lost: self.provisioning_lost.get(),
            smoothed_load: self.smoothed_load.get(),
        }
    }
}
