//! Process provisioner: one child process per worker.
//!
//! Each worker runs the configured command with `FLOCK_WORKER_ID` and
//! `FLOCK_WORKER_PORT` in its environment and is expected to serve the
//! health path on `host:port`. Ports are handed out from `base_port`
//! upward, reusing the lowest free offset.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use flock_core::{BackendStatus, ProvisionError, ProvisionerConfig, ProvisioningPort};

struct ProcessWorker {
    child: Child,
    port: u16,
}

/// [`ProvisioningPort`] that spawns local child processes.
#[derive(Clone)]
pub struct ProcessProvisioner {
    command: Vec<String>,
    host: String,
    base_port: u16,
    workers: Arc<Mutex<BTreeMap<String, ProcessWorker>>>,
}

impl ProcessProvisioner {
    pub fn new(config: &ProvisionerConfig) -> Self {
        Self {
            command: config.command.clone(),
            host: config.host.clone(),
            base_port: config.base_port,
            workers: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Number of child processes currently tracked.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    fn next_port(&self, workers: &BTreeMap<String, ProcessWorker>) -> Option<u16> {
        (0..=u16::MAX)
            .map_while(|offset| self.base_port.checked_add(offset))
            .find(|port| !workers.values().any(|w| w.port == *port))
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, ProcessWorker>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProvisioningPort for ProcessProvisioner {
    async fn launch(&self, worker_id: &str) -> Result<(), ProvisionError> {
        let launch_error = |reason: String| ProvisionError::Launch {
            worker_id: worker_id.to_string(),
            reason,
        };

        let Some((program, args)) = self.command.split_first() else {
            return Err(launch_error("no worker command configured".to_string()));
        };

        let mut workers = self.lock();
        if workers.contains_key(worker_id) {
            return Err(launch_error("worker already running".to_string()));
        }
        let port = self
            .next_port(&workers)
            .ok_or_else(|| launch_error("no free port".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .env("FLOCK_WORKER_ID", worker_id)
            .env("FLOCK_WORKER_PORT", port.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| launch_error(format!("spawn {program}: {e}")))?;

        info!(%worker_id, port, pid = child.id().unwrap_or_default(), "worker process spawned");
        workers.insert(worker_id.to_string(), ProcessWorker { child, port });
        Ok(())
    }

    async fn terminate(&self, worker_id: &str) -> Result<(), ProvisionError> {
        let removed = self.lock().remove(worker_id);
        let Some(mut worker) = removed else {
            debug!(%worker_id, "terminate for untracked worker");
            return Ok(());
        };

        if let Ok(Some(status)) = worker.child.try_wait() {
            debug!(%worker_id, %status, "worker process already exited");
            return Ok(());
        }

        worker
            .child
            .kill()
            .await
            .map_err(|e| ProvisionError::Terminate {
                worker_id: worker_id.to_string(),
                reason: e.to_string(),
            })?;
        info!(%worker_id, "worker process killed");
        Ok(())
    }

    async fn status(&self, worker_id: &str) -> Result<BackendStatus, ProvisionError> {
        let mut workers = self.lock();
        let Some(worker) = workers.get_mut(worker_id) else {
            return Ok(BackendStatus::Unknown);
        };

        match worker.child.try_wait() {
            Ok(None) => Ok(BackendStatus::Running),
            Ok(Some(status)) => {
                warn!(%worker_id, %status, "worker process exited");
                Ok(BackendStatus::Unknown)
            }
            Err(e) => Err(ProvisionError::Status {
                worker_id: worker_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn get_endpoint(&self, worker_id: &str) -> Result<Option<String>, ProvisionError> {
        let mut workers = self.lock();
        let Some(worker) = workers.get_mut(worker_id) else {
            return Ok(None);
        };

        match worker.child.try_wait() {
            Ok(None) => Ok(Some(format!("{}:{}", self.host, worker.port))),
            Ok(Some(_)) => Ok(None),
            Err(e) => Err(ProvisionError::Endpoint {
                worker_id: worker_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use flock_core::ProvisionerKind;

    fn provisioner(command: &[&str]) -> ProcessProvisioner {
        ProcessProvisioner::new(&ProvisionerConfig {
            kind: ProvisionerKind::Process,
            command: command.iter().map(|s| s.to_string()).collect(),
            host: "127.0.0.1".to_string(),
            base_port: 9100,
        })
    }

    #[tokio::test]
    async fn launch_reports_running_with_endpoint() {
        let p = provisioner(&["sleep", "30"]);

        p.launch("worker-0").await.unwrap();
        p.launch("worker-1").await.unwrap();

        assert_eq!(p.status("worker-0").await.unwrap(), BackendStatus::Running);
        assert_eq!(
            p.get_endpoint("worker-0").await.unwrap().as_deref(),
            Some("127.0.0.1:9100")
        );
        assert_eq!(
            p.get_endpoint("worker-1").await.unwrap().as_deref(),
            Some("127.0.0.1:9101")
        );

        p.terminate("worker-0").await.unwrap();
        p.terminate("worker-1").await.unwrap();
        assert_eq!(p.tracked(), 0);
    }

    #[tokio::test]
    async fn terminate_frees_port_and_forgets_worker() {
        let p = provisioner(&["sleep", "30"]);
        p.launch("worker-0").await.unwrap();
        p.launch("worker-1").await.unwrap();

        p.terminate("worker-0").await.unwrap();
        assert_eq!(p.status("worker-0").await.unwrap(), BackendStatus::Unknown);
        assert_eq!(p.get_endpoint("worker-0").await.unwrap(), None);

        p.launch("worker-2").await.unwrap();
        assert_eq!(
            p.get_endpoint("worker-2").await.unwrap().as_deref(),
            Some("127.0.0.1:9100")
        );

        p.terminate("worker-1").await.unwrap();
        p.terminate("worker-2").await.unwrap();
    }

    #[tokio::test]
    async fn exited_process_is_unknown() {
        let p = provisioner(&["true"]);
        p.launch("worker-0").await.unwrap();

        let mut status = BackendStatus::Running;
        for _ in 0..50 {
            status = p.status("worker-0").await.unwrap();
            if status != BackendStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(status, BackendStatus::Unknown);
        assert_eq!(p.get_endpoint("worker-0").await.unwrap(), None);
        p.terminate("worker-0").await.unwrap();
    }

    #[tokio::test]
    async fn launch_errors() {
        let p = provisioner(&[]);
        assert!(matches!(
            p.launch("worker-0").await,
            Err(ProvisionError::Launch { .. })
        ));

        let p = provisioner(&["/nonexistent/flock-worker"]);
        assert!(matches!(
            p.launch("worker-0").await,
            Err(ProvisionError::Launch { .. })
        ));
        assert_eq!(p.tracked(), 0);

        let p = provisioner(&["sleep", "30"]);
        p.launch("worker-0").await.unwrap();
        assert!(p.launch("worker-0").await.is_err());
        p.terminate("worker-0").await.unwrap();
    }

    #[tokio::test]
    async fn terminate_unknown_is_ok() {
        let p = provisioner(&["sleep", "30"]);
        p.terminate("ghost").await.unwrap();
    }
}
