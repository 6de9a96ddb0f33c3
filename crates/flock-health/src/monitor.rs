//! Health monitor: periodic task that walks workers through their
//! lifecycle.
//!
//! Each tick snapshots the non-Terminating workers and handles them
//! concurrently (bounded by `max_concurrent_probes`), one future per worker,
//! so no worker is probed twice at once. All state changes go through the
//! registry, which serializes them against the autoscaler and dispatcher.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use flock_core::{
    BackendStatus, HealthConfig, HealthPort, ProvisioningPort, WorkerId, call_with_timeout,
    probe_with_timeout,
};
use flock_metrics::FleetMetrics;
use flock_state::{FleetRegistry, RegistryError, WorkerPhase, WorkerRecord};

/// What one tick did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthTick {
    /// Workers examined this tick.
    pub examined: usize,
    /// Workers that received an endpoint and moved to `Initializing`.
    pub initialized: Vec<WorkerId>,
    pub became_ready: Vec<WorkerId>,
    pub became_unhealthy: Vec<WorkerId>,
    /// Removed after staying `Unhealthy` past the grace period.
    pub evicted: Vec<WorkerId>,
    /// Removed after sitting in `Provisioning` past the deadline.
    pub expired: Vec<WorkerId>,
    /// Removed because the backend no longer knew them while provisioning.
    pub lost: Vec<WorkerId>,
}

/// Per-worker result of one tick.
#[derive(Debug, Default)]
struct WorkerOutcome {
    id: WorkerId,
    initialized: bool,
    transition: Option<(WorkerPhase, WorkerPhase)>,
    verdict: Verdict,
}

#[derive(Debug, Default, PartialEq, Eq)]
enum Verdict {
    #[default]
    Keep,
    Evict,
    Expire,
    Lost,
}

/// What the backend said about a worker that has no endpoint yet.
#[derive(Debug, PartialEq, Eq)]
enum Discovery {
    Found(String),
    NotYet,
    Gone,
}

/// Probes workers and advances their phase.
pub struct HealthMonitor {
    registry: FleetRegistry,
    provisioner: Arc<dyn ProvisioningPort>,
    health: Arc<dyn HealthPort>,
    config: HealthConfig,
    metrics: Arc<FleetMetrics>,
}

impl HealthMonitor {
    pub fn new(
        registry: FleetRegistry,
        provisioner: Arc<dyn ProvisioningPort>,
        health: Arc<dyn HealthPort>,
        config: HealthConfig,
        metrics: Arc<FleetMetrics>,
    ) -> Self {
        Self {
            registry,
            provisioner,
            health,
            config,
            metrics,
        }
    }

    /// Run one health tick over the current fleet.
    pub async fn tick(&self) -> HealthTick {
        let workers: Vec<WorkerRecord> = self
            .registry
            .list_all()
            .into_iter()
            .filter(|w| w.phase != WorkerPhase::Terminating)
            .collect();

        let mut report = HealthTick {
            examined: workers.len(),
            ..Default::default()
        };

        let outcomes: Vec<WorkerOutcome> = stream::iter(workers)
            .map(|worker| self.check_worker(worker))
            .buffer_unordered(self.config.max_concurrent_probes.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            if outcome.initialized {
                report.initialized.push(outcome.id.clone());
            }
            match outcome.transition {
                Some((_, WorkerPhase::Ready)) => report.became_ready.push(outcome.id.clone()),
                Some((_, WorkerPhase::Unhealthy)) => {
                    report.became_unhealthy.push(outcome.id.clone())
                }
                _ => {}
            }
            match outcome.verdict {
                Verdict::Keep => {}
                Verdict::Evict => {
                    if self.retire(&outcome.id, WorkerPhase::Unhealthy).await {
                        self.metrics.evictions.inc();
                        report.evicted.push(outcome.id);
                    }
                }
                Verdict::Expire => {
                    if self.retire(&outcome.id, WorkerPhase::Provisioning).await {
                        self.metrics.provisioning_expired.inc();
                        report.expired.push(outcome.id);
                    }
                }
                Verdict::Lost => {
                    if self.retire(&outcome.id, WorkerPhase::Provisioning).await {
                        self.metrics.provisioning_lost.inc();
                        report.lost.push(outcome.id);
                    }
                }
            }
        }

        // Stable order regardless of completion order.
        report.initialized.sort();
        report.became_ready.sort();
        report.became_unhealthy.sort();
        report.evicted.sort();
        report.expired.sort();
        report.lost.sort();
        report
    }

    /// Run the health loop until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "health monitor started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    debug!(
                        examined = report.examined,
                        ready = report.became_ready.len(),
                        unhealthy = report.became_unhealthy.len(),
                        evicted = report.evicted.len(),
                        expired = report.expired.len(),
                        lost = report.lost.len(),
                        "health tick complete"
                    );
                }
                _ = shutdown.changed() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }

    async fn check_worker(&self, worker: WorkerRecord) -> WorkerOutcome {
        let mut outcome = WorkerOutcome {
            id: worker.id.clone(),
            ..Default::default()
        };

        let mut endpoint = worker.endpoint.clone();
        if endpoint.is_none() && worker.phase.is_spinning_up() {
            match self.discover_endpoint(&worker.id).await {
                Discovery::Found(found) => {
                    match self.registry.mark_initializing(&worker.id, &found) {
                        Ok(true) => {
                            info!(worker_id = %worker.id, endpoint = %found, "worker initializing");
                            outcome.initialized = true;
                            endpoint = Some(found);
                        }
                        Ok(false) => return outcome,
                        Err(e) => {
                            debug!(
                                worker_id = %worker.id,
                                error = %e,
                                "worker vanished during discovery"
                            );
                            return outcome;
                        }
                    }
                }
                Discovery::Gone if worker.phase == WorkerPhase::Provisioning => {
                    warn!(worker_id = %worker.id, "backend lost worker while provisioning");
                    outcome.verdict = Verdict::Lost;
                    return outcome;
                }
                Discovery::Gone | Discovery::NotYet => {
                    if worker.phase == WorkerPhase::Provisioning
                        && worker.phase_age_secs() >= self.config.provisioning_deadline.as_secs()
                    {
                        warn!(
                            worker_id = %worker.id,
                            waited_secs = worker.phase_age_secs(),
                            "worker never came up, abandoning"
                        );
                        outcome.verdict = Verdict::Expire;
                    }
                    return outcome;
                }
            }
        }

        let Some(endpoint) = endpoint else {
            return outcome;
        };

        let healthy = match probe_with_timeout(&*self.health, &endpoint, self.config.timeout).await
        {
            Ok(healthy) => healthy,
            Err(e) => {
                debug!(worker_id = %worker.id, %endpoint, error = %e, "health probe failed");
                false
            }
        };
        if !healthy {
            self.metrics.probe_failures.inc();
        }

        let applied = match self.registry.record_probe(
            &worker.id,
            healthy,
            self.config.max_consecutive_failures,
        ) {
            Ok(applied) => applied,
            Err(RegistryError::NotFound(_)) => return outcome,
            Err(e) => {
                self.metrics.registry_errors.inc();
                error!(worker_id = %worker.id, error = %e, "failed to record probe");
                return outcome;
            }
        };

        let record = &applied.record;
        if applied.changed() {
            match record.phase {
                WorkerPhase::Unhealthy => warn!(
                    worker_id = %record.id,
                    failures = record.consecutive_health_failures,
                    "worker marked unhealthy"
                ),
                _ => info!(
                    worker_id = %record.id,
                    from = ?applied.previous,
                    to = ?record.phase,
                    "worker phase changed"
                ),
            }
            outcome.transition = Some((applied.previous, record.phase));
        }

        if record.phase == WorkerPhase::Unhealthy
            && record.unhealthy_ticks > self.config.unhealthy_grace_period
        {
            warn!(
                worker_id = %record.id,
                unhealthy_ticks = record.unhealthy_ticks,
                "worker unhealthy past grace period, evicting"
            );
            outcome.verdict = Verdict::Evict;
        }

        outcome
    }

    /// Ask the backend whether a worker that is still coming up has an
    /// endpoint yet. Backend errors leave the worker as it is.
    async fn discover_endpoint(&self, id: &str) -> Discovery {
        let limit = self.config.provision_timeout;
        let status = match call_with_timeout(limit, "status", self.provisioner.status(id)).await {
            Ok(status) => status,
            Err(e) => {
                self.metrics.status_failures.inc();
                warn!(worker_id = %id, error = %e, "status check failed");
                return Discovery::NotYet;
            }
        };

        match status {
            BackendStatus::Running => {}
            BackendStatus::Unknown => return Discovery::Gone,
            BackendStatus::Pending => {
                debug!(worker_id = %id, "worker not running yet");
                return Discovery::NotYet;
            }
        }

        match call_with_timeout(limit, "get_endpoint", self.provisioner.get_endpoint(id)).await {
            Ok(Some(endpoint)) => Discovery::Found(endpoint),
            Ok(None) => Discovery::NotYet,
            Err(e) => {
                self.metrics.status_failures.inc();
                warn!(worker_id = %id, error = %e, "endpoint lookup failed");
                Discovery::NotYet
            }
        }
    }

    /// Terminate a worker that is still in `expected`, then remove it.
    ///
    /// The record sits in `Terminating` until the backend call returns, so
    /// its id cannot be handed to a replacement in the meantime. A failed
    /// terminate is logged and counted, never retried here.
    async fn retire(&self, id: &str, expected: WorkerPhase) -> bool {
        if self.registry.begin_retire(id, expected).is_none() {
            debug!(worker_id = %id, ?expected, "worker changed phase before removal");
            return false;
        }

        let limit = self.config.provision_timeout;
        match call_with_timeout(limit, "terminate", self.provisioner.terminate(id)).await {
            Ok(()) => {
                self.metrics.terminations.inc();
                info!(worker_id = %id, "worker terminated");
            }
            Err(e) => {
                self.metrics.terminate_failures.inc();
                error!(worker_id = %id, error = %e, "failed to terminate retired worker");
            }
        }
        if let Err(e) = self.registry.remove(id) {
            debug!(worker_id = %id, error = %e, "retired worker already removed");
        }
        true
    }
}
