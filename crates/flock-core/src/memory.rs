//! In-process port implementations.
//!
//! [`MemoryProvisioner`] backs the daemon's dry-run mode and every
//! control-loop test: it keeps a table of launched workers, records each
//! call, and can be told to fail or stall. [`ScriptedHealth`] answers probes
//! from a per-endpoint queue of scripted results.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{HealthCheckError, ProvisionError};
use crate::ports::{BackendStatus, HealthPort, ProvisioningPort};

const FIRST_MEMORY_PORT: u16 = 20000;

struct MemoryWorker {
    /// Status polls seen so far.
    polls: u32,
    endpoint: String,
}

#[derive(Default)]
struct MemoryBackend {
    workers: BTreeMap<String, MemoryWorker>,
    launches: Vec<String>,
    terminations: Vec<String>,
    next_port: u16,
    /// Status polls that answer `Pending` before a worker reports `Running`.
    pending_polls: u32,
    fail_launches: bool,
    fail_terminates: bool,
    fail_status: bool,
    launch_delay: Option<Duration>,
    terminate_delay: Option<Duration>,
}

/// Provisioning backend that lives entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryProvisioner {
    inner: Arc<Mutex<MemoryBackend>>,
}

impl MemoryProvisioner {
    /// Workers report `Running` on their first status poll.
    pub fn new() -> Self {
        Self::default()
    }

    /// Workers answer `Pending` for `polls` status queries before running.
    pub fn with_pending_polls(polls: u32) -> Self {
        let provisioner = Self::default();
        provisioner.lock().pending_polls = polls;
        provisioner
    }

    pub fn set_fail_launches(&self, fail: bool) {
        self.lock().fail_launches = fail;
    }

    pub fn set_fail_terminates(&self, fail: bool) {
        self.lock().fail_terminates = fail;
    }

    pub fn set_fail_status(&self, fail: bool) {
        self.lock().fail_status = fail;
    }

    /// Stall every launch by `delay` before answering.
    pub fn set_launch_delay(&self, delay: Duration) {
        self.lock().launch_delay = Some(delay);
    }

    /// Stall every terminate by `delay` before the resource goes away.
    pub fn set_terminate_delay(&self, delay: Duration) {
        self.lock().terminate_delay = Some(delay);
    }

    /// Drop a worker from the backend without a `terminate` call, as when
    /// the process or instance dies on its own.
    pub fn forget(&self, worker_id: &str) {
        self.lock().workers.remove(worker_id);
    }

    /// Register a worker as already running at `endpoint`, without
    /// counting it as a launch.
    pub fn adopt(&self, worker_id: &str, endpoint: &str) {
        let mut backend = self.lock();
        let polls = backend.pending_polls.saturating_add(1);
        backend.workers.insert(
            worker_id.to_string(),
            MemoryWorker {
                polls,
                endpoint: endpoint.to_string(),
            },
        );
    }

    /// Ids passed to successful `launch` calls, in call order.
    pub fn launches(&self) -> Vec<String> {
        self.lock().launches.clone()
    }

    /// Ids passed to successful `terminate` calls, in call order.
    pub fn terminations(&self) -> Vec<String> {
        self.lock().terminations.clone()
    }

    /// Whether the backend currently holds a resource for `worker_id`.
    pub fn is_live(&self, worker_id: &str) -> bool {
        self.lock().workers.contains_key(worker_id)
    }

    /// Endpoint assigned to `worker_id`, regardless of its status.
    pub fn endpoint_of(&self, worker_id: &str) -> Option<String> {
        self.lock()
            .workers
            .get(worker_id)
            .map(|w| w.endpoint.clone())
    }

    fn lock(&self) -> MutexGuard<'_, MemoryBackend> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProvisioningPort for MemoryProvisioner {
    async fn launch(&self, worker_id: &str) -> Result<(), ProvisionError> {
        let delay = self.lock().launch_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut backend = self.lock();
        if backend.fail_launches {
            return Err(ProvisionError::Launch {
                worker_id: worker_id.to_string(),
                reason: "launch rejected by memory backend".to_string(),
            });
        }

        if backend.next_port == 0 {
            backend.next_port = FIRST_MEMORY_PORT;
        }
        let port = backend.next_port;
        backend.next_port = backend.next_port.wrapping_add(1);

        backend.workers.insert(
            worker_id.to_string(),
            MemoryWorker {
                polls: 0,
                endpoint: format!("127.0.0.1:{port}"),
            },
        );
        backend.launches.push(worker_id.to_string());
        debug!(%worker_id, port, "memory worker launched");
        Ok(())
    }

    async fn terminate(&self, worker_id: &str) -> Result<(), ProvisionError> {
        let delay = self.lock().terminate_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut backend = self.lock();
        if backend.fail_terminates {
            return Err(ProvisionError::Terminate {
                worker_id: worker_id.to_string(),
                reason: "terminate rejected by memory backend".to_string(),
            });
        }
        backend.workers.remove(worker_id);
        backend.terminations.push(worker_id.to_string());
        debug!(%worker_id, "memory worker terminated");
        Ok(())
    }

    async fn status(&self, worker_id: &str) -> Result<BackendStatus, ProvisionError> {
        let mut backend = self.lock();
        if backend.fail_status {
            return Err(ProvisionError::Status {
                worker_id: worker_id.to_string(),
                reason: "status unavailable".to_string(),
            });
        }
        let pending_polls = backend.pending_polls;
        match backend.workers.get_mut(worker_id) {
            Some(worker) => {
                worker.polls = worker.polls.saturating_add(1);
                if worker.polls > pending_polls {
                    Ok(BackendStatus::Running)
                } else {
                    Ok(BackendStatus::Pending)
                }
            }
            None => Ok(BackendStatus::Unknown),
        }
    }

    async fn get_endpoint(&self, worker_id: &str) -> Result<Option<String>, ProvisionError> {
        let backend = self.lock();
        Ok(backend
            .workers
            .get(worker_id)
            .filter(|w| w.polls > backend.pending_polls)
            .map(|w| w.endpoint.clone()))
    }
}

/// One scripted probe answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedProbe {
    Healthy,
    Unhealthy,
    Error,
}

struct HealthScript {
    default: ScriptedProbe,
    queued: HashMap<String, VecDeque<ScriptedProbe>>,
    calls: HashMap<String, usize>,
    delay: Option<Duration>,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Health port that replays queued answers per endpoint, falling back to a
/// default once an endpoint's queue is empty.
#[derive(Clone)]
pub struct ScriptedHealth {
    inner: Arc<Mutex<HealthScript>>,
}

impl Default for ScriptedHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHealth {
    /// Every endpoint answers healthy unless scripted otherwise.
    pub fn new() -> Self {
        Self::with_default(ScriptedProbe::Healthy)
    }

    pub fn with_default(default: ScriptedProbe) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HealthScript {
                default,
                queued: HashMap::new(),
                calls: HashMap::new(),
                delay: None,
                in_flight: 0,
                peak_in_flight: 0,
            })),
        }
    }

    pub fn set_default(&self, default: ScriptedProbe) {
        self.lock().default = default;
    }

    /// Queue the next answer for `endpoint`.
    pub fn push(&self, endpoint: &str, probe: ScriptedProbe) {
        self.lock()
            .queued
            .entry(endpoint.to_string())
            .or_default()
            .push_back(probe);
    }

    /// Stall every probe by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Number of probes issued against `endpoint`.
    pub fn calls_for(&self, endpoint: &str) -> usize {
        self.lock().calls.get(endpoint).copied().unwrap_or(0)
    }

    /// Most probes ever running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.lock().peak_in_flight
    }

    fn lock(&self) -> MutexGuard<'_, HealthScript> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HealthPort for ScriptedHealth {
    async fn health_check(&self, endpoint: &str) -> Result<bool, HealthCheckError> {
        let (probe, delay) = {
            let mut script = self.lock();
            *script.calls.entry(endpoint.to_string()).or_default() += 1;
            script.in_flight += 1;
            script.peak_in_flight = script.peak_in_flight.max(script.in_flight);
            let default = script.default;
            let probe = script
                .queued
                .get_mut(endpoint)
                .and_then(VecDeque::pop_front)
                .unwrap_or(default);
            (probe, script.delay)
        };
        let _in_flight = InFlight(self);

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match probe {
            ScriptedProbe::Healthy => Ok(true),
            ScriptedProbe::Unhealthy => Ok(false),
            ScriptedProbe::Error => Err(HealthCheckError::Connect {
                endpoint: endpoint.to_string(),
                reason: "scripted connection failure".to_string(),
            }),
        }
    }
}

/// Counts a probe as running until dropped, including when a timeout
/// cancels it.
struct InFlight<'a>(&'a ScriptedHealth);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut script = self.0.lock();
        script.in_flight = script.in_flight.saturating_sub(1);
    }
}
