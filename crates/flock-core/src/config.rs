//! flock.toml configuration parser.
//!
//! Every field has a default, so an empty file yields a usable dry-run
//! configuration. [`FleetConfig::validate`] must pass before any loop
//! starts.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::serde_str;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    pub fleet: FleetSection,
    pub autoscale: AutoscaleConfig,
    pub health: HealthConfig,
    pub dispatch: DispatchConfig,
    pub provisioner: ProvisionerConfig,
    pub api: ApiConfig,
}

/// Fleet shape: naming, per-worker capacity, and size bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetSection {
    /// Worker ids are `{worker_prefix}-{n}`.
    pub worker_prefix: String,
    /// Maximum concurrent units of work per worker.
    pub worker_capacity: u32,
    pub min_workers: u32,
    pub max_workers: u32,
}

impl Default for FleetSection {
    fn default() -> Self {
        Self {
            worker_prefix: "worker".to_string(),
            worker_capacity: 10,
            min_workers: 1,
            max_workers: 4,
        }
    }
}

/// Autoscaling controller parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AutoscaleConfig {
    /// Time between controller ticks.
    #[serde(with = "serde_str")]
    pub interval: Duration,
    /// Number of load samples in the smoothing window.
    pub window_size: usize,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    /// How long a scale-down victim may drain before it is force-terminated.
    #[serde(with = "serde_str")]
    pub drain_timeout: Duration,
    #[serde(with = "serde_str")]
    pub drain_poll_interval: Duration,
    /// Per-call bound on launch/terminate.
    #[serde(with = "serde_str")]
    pub provision_timeout: Duration,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            window_size: 5,
            scale_up_threshold: 8.0,
            scale_down_threshold: 2.0,
            drain_timeout: Duration::from_secs(120),
            drain_poll_interval: Duration::from_millis(250),
            provision_timeout: Duration::from_secs(30),
        }
    }
}

/// Health monitor parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(with = "serde_str")]
    pub interval: Duration,
    /// Per-probe bound on health checks.
    #[serde(with = "serde_str")]
    pub timeout: Duration,
    /// Per-call bound on status / endpoint queries.
    #[serde(with = "serde_str")]
    pub provision_timeout: Duration,
    /// HTTP path probed by the HTTP health adapter.
    pub path: String,
    /// Consecutive failures that flip a worker to `Unhealthy`.
    pub max_consecutive_failures: u32,
    /// Ticks a worker may stay `Unhealthy` before it is evicted.
    pub unhealthy_grace_period: u32,
    pub max_concurrent_probes: usize,
    /// How long a worker may sit in `Provisioning` before it is abandoned.
    #[serde(with = "serde_str")]
    pub provisioning_deadline: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(5),
            provision_timeout: Duration::from_secs(30),
            path: "/health".to_string(),
            max_consecutive_failures: 3,
            unhealthy_grace_period: 3,
            max_concurrent_probes: 50,
            provisioning_deadline: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Pick-and-reserve attempts before reporting no capacity.
    pub max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionerKind {
    /// Spawn a local process per worker.
    Process,
    /// Synthetic always-running workers (dry run).
    #[default]
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvisionerConfig {
    pub kind: ProvisionerKind,
    /// Program and arguments spawned per worker (process provisioner).
    pub command: Vec<String>,
    /// Host the spawned workers bind to.
    pub host: String,
    /// Worker `n` listens on `base_port + n`.
    pub base_port: u16,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            kind: ProvisionerKind::Memory,
            command: Vec::new(),
            host: "127.0.0.1".to_string(),
            base_port: 9000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the control loops cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fleet = &self.fleet;
        if fleet.max_workers == 0 {
            return Err(invalid("fleet.max_workers must be at least 1"));
        }
        if fleet.max_workers < fleet.min_workers {
            return Err(invalid(format!(
                "fleet.max_workers ({}) is below fleet.min_workers ({})",
                fleet.max_workers, fleet.min_workers
            )));
        }
        if fleet.worker_capacity == 0 {
            return Err(invalid("fleet.worker_capacity must be at least 1"));
        }
        if fleet.worker_prefix.is_empty() {
            return Err(invalid("fleet.worker_prefix must not be empty"));
        }

        let scale = &self.autoscale;
        if scale.window_size == 0 {
            return Err(invalid("autoscale.window_size must be at least 1"));
        }
        if !scale.scale_up_threshold.is_finite() || !scale.scale_down_threshold.is_finite() {
            return Err(invalid("autoscale thresholds must be finite numbers"));
        }
        if scale.scale_down_threshold >= scale.scale_up_threshold {
            return Err(invalid(format!(
                "autoscale.scale_down_threshold ({}) must be below scale_up_threshold ({})",
                scale.scale_down_threshold, scale.scale_up_threshold
            )));
        }
        if scale.interval.is_zero() {
            return Err(invalid("autoscale.interval must be non-zero"));
        }
        if scale.drain_poll_interval.is_zero() {
            return Err(invalid("autoscale.drain_poll_interval must be non-zero"));
        }

        let health = &self.health;
        if health.max_consecutive_failures == 0 {
            return Err(invalid("health.max_consecutive_failures must be at least 1"));
        }
        if health.max_concurrent_probes == 0 {
            return Err(invalid("health.max_concurrent_probes must be at least 1"));
        }
        if health.interval.is_zero() {
            return Err(invalid("health.interval must be non-zero"));
        }

        if self.dispatch.max_attempts == 0 {
            return Err(invalid("dispatch.max_attempts must be at least 1"));
        }

        if self.provisioner.kind == ProvisionerKind::Process && self.provisioner.command.is_empty()
        {
            return Err(invalid("provisioner.command is required for the process provisioner"));
        }

        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_valid() {
        let config = FleetConfig::from_toml_str("").unwrap();
        assert_eq!(config, FleetConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn parse_full_file() {
        let toml_str = r#"
[fleet]
worker_prefix = "gpu"
worker_capacity = 4
min_workers = 2
max_workers = 8

[autoscale]
interval = "15s"
window_size = 10
scale_up_threshold = 12.5
scale_down_threshold = 1.0
drain_timeout = "2m"

[health]
interval = 5
timeout = "500ms"
max_consecutive_failures = 4

[provisioner]
kind = "process"
command = ["python", "-m", "server"]
base_port = 7000

[api]
listen = "127.0.0.1:9999"
"#;
        let config = FleetConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.fleet.worker_prefix, "gpu");
        assert_eq!(config.fleet.max_workers, 8);
        assert_eq!(config.autoscale.interval, Duration::from_secs(15));
        assert_eq!(config.autoscale.drain_timeout, Duration::from_secs(120));
        assert_eq!(config.health.interval, Duration::from_secs(5));
        assert_eq!(config.health.timeout, Duration::from_millis(500));
        // Untouched fields keep their defaults.
        assert_eq!(config.health.unhealthy_grace_period, 3);
        assert_eq!(config.provisioner.kind, ProvisionerKind::Process);
        assert_eq!(config.provisioner.command.len(), 3);
        assert_eq!(config.api.listen.port(), 9999);
        config.validate().unwrap();
    }

    #[test]
    fn bad_duration_is_a_parse_error() {
        let err = FleetConfig::from_toml_str("[health]\ninterval = \"often\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_max_below_min() {
        let mut config = FleetConfig::default();
        config.fleet.min_workers = 5;
        config.fleet.max_workers = 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_inverted_thresholds() {
        let mut config = FleetConfig::default();
        config.autoscale.scale_down_threshold = 8.0;
        config.autoscale.scale_up_threshold = 8.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_nan_thresholds() {
        let config = FleetConfig::from_toml_str(
            "[autoscale]\nscale_up_threshold = nan\nscale_down_threshold = 1.0\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = FleetConfig::default();
        config.autoscale.scale_down_threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_drain_poll_interval() {
        let config =
            FleetConfig::from_toml_str("[autoscale]\ndrain_poll_interval = \"0ms\"\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_zero_capacity_and_window() {
        let mut config = FleetConfig::default();
        config.fleet.worker_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = FleetConfig::default();
        config.autoscale.window_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn equal_bounds_are_allowed() {
        let mut config = FleetConfig::default();
        config.fleet.min_workers = 3;
        config.fleet.max_workers = 3;
        config.validate().unwrap();
    }

    #[test]
    fn process_provisioner_needs_command() {
        let mut config = FleetConfig::default();
        config.provisioner.kind = ProvisionerKind::Process;
        assert!(config.validate().is_err());

        config.provisioner.command = vec!["./worker".to_string()];
        config.validate().unwrap();
    }

    #[test]
    fn round_trips_through_toml() {
        let config = FleetConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("drain_timeout = \"120s\""));
        assert_eq!(FleetConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flock.toml");
        std::fs::write(&path, "[fleet]\nmax_workers = 6\n").unwrap();

        let config = FleetConfig::from_file(&path).unwrap();
        assert_eq!(config.fleet.max_workers, 6);

        let missing = FleetConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
