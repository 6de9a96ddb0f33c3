//! Autoscaler: smoothed-load fleet scaling.
//!
//! Reads a census of the registry each tick, folds the load signal into a
//! [`LoadWindow`], and takes at most one action: launch a worker, or drain
//! and terminate the least-loaded Ready worker. Launches go through the
//! provisioning backend before any record is added, so a failed launch
//! leaves the registry untouched and the same condition retries it next
//! tick.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use flock_core::{
    AutoscaleConfig, FleetSection, ProvisionError, ProvisioningPort, WorkerId, call_with_timeout,
};
use flock_metrics::FleetMetrics;
use flock_state::{FleetCensus, FleetRegistry, RegistryResult, WorkerRecord};

use crate::window::LoadWindow;

/// What the fleet should do, given a census and the smoothed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleIntent {
    /// Load is above the scale-up threshold.
    Up,
    /// The fleet has fallen below `min_workers`.
    Replenish,
    /// Load is below the scale-down threshold.
    Down,
    Hold,
}

/// The action a tick actually took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// A worker was launched and registered as `Provisioning`.
    Launched(WorkerId),
    /// The backend refused or timed out the launch; nothing was registered.
    LaunchFailed(WorkerId),
    /// A worker was drained, terminated, and removed. `forced` is set when
    /// the drain timeout expired with work still in flight.
    Terminated { worker_id: WorkerId, forced: bool },
    /// No change needed.
    NoChange,
}

/// Grows and shrinks the fleet between `min_workers` and `max_workers`.
pub struct Autoscaler {
    registry: FleetRegistry,
    provisioner: Arc<dyn ProvisioningPort>,
    fleet: FleetSection,
    config: AutoscaleConfig,
    window: LoadWindow,
    metrics: Arc<FleetMetrics>,
}

impl Autoscaler {
    pub fn new(
        registry: FleetRegistry,
        provisioner: Arc<dyn ProvisioningPort>,
        fleet: FleetSection,
        config: AutoscaleConfig,
        metrics: Arc<FleetMetrics>,
    ) -> Self {
        let window = LoadWindow::new(config.window_size);
        Self {
            registry,
            provisioner,
            fleet,
            config,
            window,
            metrics,
        }
    }

    /// Current smoothed load, `None` before the first tick.
    pub fn smoothed_load(&self) -> Option<f64> {
        self.window.smoothed()
    }

    /// Decide what to do for a census and smoothed load. Pure.
    pub fn evaluate(&self, census: &FleetCensus, smoothed: Option<f64>) -> ScaleIntent {
        let min = self.fleet.min_workers as usize;
        let max = self.fleet.max_workers as usize;
        let live = census.live();
        let spinning = census.spinning_up();

        if spinning == 0 && live < min && live < max {
            return ScaleIntent::Replenish;
        }

        let Some(load) = smoothed else {
            return ScaleIntent::Hold;
        };

        if load > self.config.scale_up_threshold && live < max && spinning == 0 {
            return ScaleIntent::Up;
        }

        if load < self.config.scale_down_threshold && census.ready > min && live == census.ready {
            return ScaleIntent::Down;
        }

        ScaleIntent::Hold
    }

    /// Run one tick using the summed `in_flight` of Ready workers as the
    /// load sample.
    pub async fn tick(&mut self) -> RegistryResult<ScaleDecision> {
        let sample = self.registry.census().ready_load as f64;
        self.tick_with_sample(sample).await
    }

    /// Run one tick with an externally supplied load sample.
    pub async fn tick_with_sample(&mut self, sample: f64) -> RegistryResult<ScaleDecision> {
        self.window.push(sample);
        let smoothed = self.window.smoothed();
        if let Some(load) = smoothed {
            self.metrics.smoothed_load.set(load);
        }

        let census = self.registry.census();
        let intent = self.evaluate(&census, smoothed);
        debug!(
            sample,
            smoothed = smoothed.unwrap_or_default(),
            live = census.live(),
            ready = census.ready,
            spinning_up = census.spinning_up(),
            ?intent,
            "autoscale tick"
        );

        match intent {
            ScaleIntent::Up | ScaleIntent::Replenish => self.scale_up(intent).await,
            ScaleIntent::Down => self.scale_down().await,
            ScaleIntent::Hold => Ok(ScaleDecision::NoChange),
        }
    }

    /// Run the autoscaler loop until the shutdown signal flips.
    ///
    /// A scale-down drain runs inside the tick, so shutdown is observed once
    /// the drain finishes or times out.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            min_workers = self.fleet.min_workers,
            max_workers = self.fleet.max_workers,
            "autoscaler started"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        self.metrics.registry_errors.inc();
                        error!(error = %e, "autoscaler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }

    async fn scale_up(&self, intent: ScaleIntent) -> RegistryResult<ScaleDecision> {
        let worker_id = self.registry.next_worker_id(&self.fleet.worker_prefix);
        let limit = self.config.provision_timeout;

        match call_with_timeout(limit, "launch", self.provisioner.launch(&worker_id)).await {
            Ok(()) => {
                self.registry.add(WorkerRecord::provisioning(
                    worker_id.clone(),
                    self.fleet.worker_capacity,
                ))?;
                self.metrics.launches.inc();
                info!(worker_id = %worker_id, ?intent, "worker launched");
                Ok(ScaleDecision::Launched(worker_id))
            }
            Err(e) => {
                self.metrics.launch_failures.inc();
                warn!(worker_id = %worker_id, error = %e, "worker launch failed");
                if matches!(e, ProvisionError::Timeout { .. }) {
                    // The backend may still bring it up; nothing tracks it.
                    let cleanup = self.provisioner.terminate(&worker_id);
                    if let Err(e) = call_with_timeout(limit, "terminate", cleanup).await {
                        debug!(
                            worker_id = %worker_id,
                            error = %e,
                            "cleanup after launch timeout failed"
                        );
                    }
                }
                Ok(ScaleDecision::LaunchFailed(worker_id))
            }
        }
    }

    async fn scale_down(&self) -> RegistryResult<ScaleDecision> {
        let Some(victim) = self.registry.least_loaded_ready() else {
            return Ok(ScaleDecision::NoChange);
        };
        let worker_id = victim.id;

        if let Err(e) = self.registry.begin_drain(&worker_id) {
            // Changed phase or vanished since the census; next tick decides again.
            debug!(worker_id = %worker_id, error = %e, "scale-down candidate moved on");
            return Ok(ScaleDecision::NoChange);
        }
        info!(worker_id = %worker_id, in_flight = victim.in_flight, "draining worker");

        let forced = !self.drain(&worker_id).await;
        if forced {
            self.metrics.drains_forced.inc();
            warn!(
                worker_id = %worker_id,
                in_flight = self.registry.in_flight(&worker_id).unwrap_or_default(),
                timeout_ms = self.config.drain_timeout.as_millis() as u64,
                "drain timed out, terminating anyway"
            );
        } else {
            self.metrics.drains_completed.inc();
        }

        let limit = self.config.provision_timeout;
        match call_with_timeout(limit, "terminate", self.provisioner.terminate(&worker_id)).await {
            Ok(()) => self.metrics.terminations.inc(),
            Err(e) => {
                self.metrics.terminate_failures.inc();
                error!(worker_id = %worker_id, error = %e, "failed to terminate drained worker");
            }
        }

        self.registry.remove(&worker_id)?;
        info!(worker_id = %worker_id, forced, "worker scaled down");
        Ok(ScaleDecision::Terminated { worker_id, forced })
    }

    /// Wait for a draining worker's `in_flight` to reach zero.
    ///
    /// Returns `false` if the drain timeout expired first.
    async fn drain(&self, worker_id: &str) -> bool {
        let deadline = Instant::now() + self.config.drain_timeout;
        loop {
            match self.registry.in_flight(worker_id) {
                Some(0) | None => return true,
                Some(_) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let pause = self.config.drain_poll_interval.min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }
}
