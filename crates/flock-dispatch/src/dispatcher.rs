//! Dispatcher: reserve capacity on the least-loaded Ready worker.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use flock_core::{DispatchConfig, WorkerId};
use flock_metrics::FleetMetrics;
use flock_state::{FleetRegistry, RegistryError, RegistryResult};

/// Answer to a dispatch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchResult {
    /// One unit of capacity on `worker_id` is now held for the caller.
    Assigned { worker_id: WorkerId, endpoint: String },
    /// Backpressure: no Ready worker has headroom.
    NoCapacity,
}

/// How a forwarded unit of work ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// Admission control over a [`FleetRegistry`].
///
/// Both operations are single critical sections on the registry and never
/// suspend, so the dispatcher is safe to call from any thread or task.
#[derive(Clone)]
pub struct Dispatcher {
    registry: FleetRegistry,
    max_attempts: u32,
    metrics: Arc<FleetMetrics>,
}

impl Dispatcher {
    pub fn new(
        registry: FleetRegistry,
        config: &DispatchConfig,
        metrics: Arc<FleetMetrics>,
    ) -> Self {
        Self {
            registry,
            max_attempts: config.max_attempts.max(1),
            metrics,
        }
    }

    /// Pick the least-loaded available worker and reserve one unit on it.
    ///
    /// A reservation can lose a race with a concurrent dispatch between the
    /// pick and the reserve; the pick is retried up to `max_attempts` times
    /// before answering `NoCapacity`.
    pub fn try_dispatch(&self) -> DispatchResult {
        for attempt in 1..=self.max_attempts {
            let Some(candidate) = self.registry.pick_available() else {
                break;
            };

            if !self.registry.try_reserve(&candidate.id) {
                self.metrics.dispatch_conflicts.inc();
                debug!(
                    worker_id = %candidate.id,
                    attempt,
                    "reservation lost to a concurrent dispatch"
                );
                continue;
            }

            let Some(endpoint) = candidate.endpoint else {
                // Ready without an endpoint: hand the unit back and try again.
                self.metrics.registry_errors.inc();
                error!(worker_id = %candidate.id, "ready worker has no endpoint");
                self.hand_back(&candidate.id);
                continue;
            };

            self.metrics.dispatch_assigned.inc();
            debug!(worker_id = %candidate.id, %endpoint, "work assigned");
            return DispatchResult::Assigned {
                worker_id: candidate.id,
                endpoint,
            };
        }

        self.metrics.dispatch_no_capacity.inc();
        debug!("no worker has capacity");
        DispatchResult::NoCapacity
    }

    /// Return the unit held by an earlier `Assigned` answer.
    ///
    /// Must be called exactly once per assignment, whatever the outcome.
    /// A second call for the same unit surfaces as
    /// [`RegistryError::OverRelease`] and leaves the worker untouched.
    pub fn complete(&self, worker_id: &str, outcome: Outcome) -> RegistryResult<()> {
        match self.registry.release(worker_id) {
            Ok(()) => {
                match outcome {
                    Outcome::Success => self.metrics.completions_success.inc(),
                    Outcome::Failure => self.metrics.completions_failure.inc(),
                }
                debug!(%worker_id, ?outcome, "work completed");
                Ok(())
            }
            Err(e @ RegistryError::OverRelease(_)) => {
                self.metrics.over_releases.inc();
                self.metrics.registry_errors.inc();
                error!(%worker_id, ?outcome, error = %e, "completion without matching dispatch");
                Err(e)
            }
            Err(e) => {
                self.metrics.registry_errors.inc();
                warn!(%worker_id, ?outcome, error = %e, "completion for unknown worker");
                Err(e)
            }
        }
    }

    /// Undo a reservation that will not be handed to a caller.
    fn hand_back(&self, worker_id: &str) {
        if let Err(e) = self.registry.release(worker_id) {
            self.metrics.registry_errors.inc();
            error!(%worker_id, error = %e, "failed to return unused reservation");
        }
    }
}
