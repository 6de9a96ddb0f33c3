//! Domain types for the fleet registry.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub use flock_core::WorkerId;

/// Lifecycle phase of a worker.
///
/// There is no terminal phase: a terminated worker is removed from the
/// registry rather than parked in a final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    /// Launch accepted by the backend; no endpoint yet.
    Provisioning,
    /// Endpoint known, waiting for the first healthy probe.
    Initializing,
    /// Healthy and eligible for dispatch.
    Ready,
    /// Crossed the consecutive-failure threshold.
    Unhealthy,
    /// Draining ahead of termination; never dispatched to.
    Terminating,
}

impl WorkerPhase {
    pub const ALL: [WorkerPhase; 5] = [
        WorkerPhase::Provisioning,
        WorkerPhase::Initializing,
        WorkerPhase::Ready,
        WorkerPhase::Unhealthy,
        WorkerPhase::Terminating,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerPhase::Provisioning => "provisioning",
            WorkerPhase::Initializing => "initializing",
            WorkerPhase::Ready => "ready",
            WorkerPhase::Unhealthy => "unhealthy",
            WorkerPhase::Terminating => "terminating",
        }
    }

    /// Still coming up: counts against "a launch is already in progress".
    pub fn is_spinning_up(&self) -> bool {
        matches!(self, WorkerPhase::Provisioning | WorkerPhase::Initializing)
    }

    /// Live or becoming live; counts against `max_workers`.
    pub fn is_live(&self) -> bool {
        self.is_spinning_up() || *self == WorkerPhase::Ready
    }
}

/// In-memory state for one worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub phase: WorkerPhase,
    /// Reachable address; `None` until the backend reports one.
    pub endpoint: Option<String>,
    /// Maximum concurrent units of work.
    pub capacity: u32,
    /// Units of work dispatched but not yet completed.
    pub in_flight: u32,
    pub consecutive_health_failures: u32,
    /// Health ticks spent in `Unhealthy` without recovering.
    pub unhealthy_ticks: u32,
    /// Unix timestamp (seconds) the record was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last phase change.
    pub phase_since: u64,
}

impl WorkerRecord {
    /// A freshly launched worker in `Provisioning`.
    pub fn provisioning(id: impl Into<WorkerId>, capacity: u32) -> Self {
        let now = epoch_secs();
        Self {
            id: id.into(),
            phase: WorkerPhase::Provisioning,
            endpoint: None,
            capacity,
            in_flight: 0,
            consecutive_health_failures: 0,
            unhealthy_ticks: 0,
            created_at: now,
            phase_since: now,
        }
    }

    /// A worker that is already serving at `endpoint`.
    pub fn ready(id: impl Into<WorkerId>, endpoint: impl Into<String>, capacity: u32) -> Self {
        let mut record = Self::provisioning(id, capacity);
        record.endpoint = Some(endpoint.into());
        record.phase = WorkerPhase::Ready;
        record
    }

    pub fn has_headroom(&self) -> bool {
        self.in_flight < self.capacity
    }

    /// Eligible for new work right now.
    pub fn is_available(&self) -> bool {
        self.phase == WorkerPhase::Ready && self.has_headroom()
    }

    /// Seconds spent in the current phase.
    pub fn phase_age_secs(&self) -> u64 {
        epoch_secs().saturating_sub(self.phase_since)
    }

    pub(crate) fn set_phase(&mut self, phase: WorkerPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.phase_since = epoch_secs();
        }
    }

    /// Fold one probe result into the record.
    ///
    /// A success makes the worker `Ready` and clears both counters. A
    /// failure bumps the consecutive-failure count; reaching
    /// `max_failures` makes the worker `Unhealthy`, and every failed probe
    /// while `Unhealthy` adds to `unhealthy_ticks`. Workers without an
    /// endpoint and workers already `Terminating` are left untouched.
    ///
    /// Returns `false` if the probe was ignored.
    pub fn apply_probe(&mut self, healthy: bool, max_failures: u32) -> bool {
        if self.endpoint.is_none()
            || matches!(
                self.phase,
                WorkerPhase::Provisioning | WorkerPhase::Terminating
            )
        {
            return false;
        }

        if healthy {
            self.consecutive_health_failures = 0;
            self.unhealthy_ticks = 0;
            self.set_phase(WorkerPhase::Ready);
        } else {
            self.consecutive_health_failures = self.consecutive_health_failures.saturating_add(1);
            if self.consecutive_health_failures >= max_failures {
                self.set_phase(WorkerPhase::Unhealthy);
            }
            if self.phase == WorkerPhase::Unhealthy {
                self.unhealthy_ticks = self.unhealthy_ticks.saturating_add(1);
            }
        }
        true
    }
}

/// Per-phase counts and Ready load, read in one critical section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetCensus {
    pub provisioning: usize,
    pub initializing: usize,
    pub ready: usize,
    pub unhealthy: usize,
    pub terminating: usize,
    /// Sum of `in_flight` across Ready workers.
    pub ready_load: u64,
    /// Sum of `capacity` across Ready workers.
    pub ready_capacity: u64,
}

impl FleetCensus {
    /// Ready + Initializing + Provisioning.
    pub fn live(&self) -> usize {
        self.ready + self.initializing + self.provisioning
    }

    /// Provisioning + Initializing.
    pub fn spinning_up(&self) -> usize {
        self.provisioning + self.initializing
    }

    pub fn count(&self, phase: WorkerPhase) -> usize {
        match phase {
            WorkerPhase::Provisioning => self.provisioning,
            WorkerPhase::Initializing => self.initializing,
            WorkerPhase::Ready => self.ready,
            WorkerPhase::Unhealthy => self.unhealthy,
            WorkerPhase::Terminating => self.terminating,
        }
    }

    pub(crate) fn tally(&mut self, record: &WorkerRecord) {
        match record.phase {
            WorkerPhase::Provisioning => self.provisioning += 1,
            WorkerPhase::Initializing => self.initializing += 1,
            WorkerPhase::Ready => {
                self.ready += 1;
                self.ready_load += u64::from(record.in_flight);
                self.ready_capacity += u64::from(record.capacity);
            }
            WorkerPhase::Unhealthy => self.unhealthy += 1,
            WorkerPhase::Terminating => self.terminating += 1,
        }
    }
}

pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
