//! Fleet assembly: wires the registry, ports, and control loops together.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use flock_autoscale::Autoscaler;
use flock_core::memory::{MemoryProvisioner, ScriptedHealth};
use flock_core::{FleetConfig, HealthPort, ProvisionerKind, ProvisioningPort};
use flock_dispatch::Dispatcher;
use flock_health::{HealthMonitor, HttpHealthPort};
use flock_metrics::FleetMetrics;
use flock_state::FleetRegistry;

use crate::api::ApiState;
use crate::provisioner::ProcessProvisioner;

/// Load and validate a config file; no path means all defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<FleetConfig> {
    let config = match path {
        Some(path) => FleetConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => FleetConfig::default(),
    };
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Backend ports selected by `[provisioner] kind`.
///
/// The memory backend has no real endpoints to probe, so it is paired with
/// an always-healthy probe.
pub fn ports_for(config: &FleetConfig) -> (Arc<dyn ProvisioningPort>, Arc<dyn HealthPort>) {
    match config.provisioner.kind {
        ProvisionerKind::Process => (
            Arc::new(ProcessProvisioner::new(&config.provisioner)),
            Arc::new(HttpHealthPort::new(
                config.health.path.clone(),
                config.health.timeout,
            )),
        ),
        ProvisionerKind::Memory => (
            Arc::new(MemoryProvisioner::new()),
            Arc::new(ScriptedHealth::new()),
        ),
    }
}

/// Every fleet subsystem, sharing one registry and one metrics set.
pub struct Fleet {
    pub registry: FleetRegistry,
    pub metrics: Arc<FleetMetrics>,
    pub dispatcher: Dispatcher,
    monitor: HealthMonitor,
    autoscaler: Autoscaler,
}

impl Fleet {
    pub fn new(
        config: &FleetConfig,
        provisioner: Arc<dyn ProvisioningPort>,
        health: Arc<dyn HealthPort>,
    ) -> Self {
        let registry = FleetRegistry::new();
        let metrics = Arc::new(FleetMetrics::new());

        let monitor = HealthMonitor::new(
            registry.clone(),
            provisioner.clone(),
            health,
            config.health.clone(),
            metrics.clone(),
        );
        let autoscaler = Autoscaler::new(
            registry.clone(),
            provisioner,
            config.fleet.clone(),
            config.autoscale.clone(),
            metrics.clone(),
        );
        let dispatcher = Dispatcher::new(registry.clone(), &config.dispatch, metrics.clone());

        Self {
            registry,
            metrics,
            dispatcher,
            monitor,
            autoscaler,
        }
    }

    /// State for [`build_router`](crate::build_router).
    pub fn api_state(&self) -> ApiState {
        ApiState {
            registry: self.registry.clone(),
            dispatcher: self.dispatcher.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Start the health and autoscale loops. Both exit when `shutdown`
    /// flips; await the handles to wait for them.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let Fleet {
            monitor,
            mut autoscaler,
            ..
        } = self;

        let health_shutdown = shutdown.clone();
        let health_handle = tokio::spawn(async move {
            monitor.run(health_shutdown).await;
        });

        let autoscale_handle = tokio::spawn(async move {
            autoscaler.run(shutdown).await;
        });

        info!("control loops started");
        vec![health_handle, autoscale_handle]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_without_path() {
        let config = load_config(None).unwrap();
        assert_eq!(config, FleetConfig::default());
    }

    #[test]
    fn load_config_rejects_missing_file() {
        let err = load_config(Some(Path::new("/nonexistent/flock.toml"))).unwrap_err();
        assert!(err.to_string().contains("loading config"));
    }

    #[tokio::test]
    async fn fleet_shares_one_registry() {
        let config = FleetConfig::default();
        let (provisioner, health) = ports_for(&config);
        let fleet = Fleet::new(&config, provisioner, health);

        fleet
            .registry
            .add(flock_state::WorkerRecord::ready("w-0", "a:1", 1))
            .unwrap();

        let state = fleet.api_state();
        assert_eq!(state.registry.len(), 1);
        assert!(matches!(
            state.dispatcher.try_dispatch(),
            flock_dispatch::DispatchResult::Assigned { .. }
        ));
        assert_eq!(fleet.metrics.dispatch_assigned.get(), 1);
    }
}
