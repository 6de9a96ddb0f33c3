//! Fleet registry: the authoritative, concurrency-safe worker table.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::types::*;

/// Result of folding a probe into a record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeApplied {
    /// Phase before the probe was applied.
    pub previous: WorkerPhase,
    /// Snapshot after the probe was applied.
    pub record: WorkerRecord,
}

impl ProbeApplied {
    pub fn changed(&self) -> bool {
        self.previous != self.record.phase
    }
}

/// Owns every [`WorkerRecord`].
///
/// Keyed by id in a `BTreeMap`, so iteration order is lexicographic id
/// order and "lowest id wins" ties fall out of a plain scan.
#[derive(Clone, Default)]
pub struct FleetRegistry {
    records: Arc<Mutex<BTreeMap<WorkerId, WorkerRecord>>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record. Fails if the id is already present.
    pub fn add(&self, record: WorkerRecord) -> RegistryResult<()> {
        let mut records = self.lock();
        if records.contains_key(&record.id) {
            return Err(RegistryError::DuplicateId(record.id));
        }
        debug!(worker_id = %record.id, phase = ?record.phase, "worker registered");
        records.insert(record.id.clone(), record);
        Ok(())
    }

    /// Remove and return a record.
    pub fn remove(&self, id: &str) -> RegistryResult<WorkerRecord> {
        let removed = self
            .lock()
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        debug!(worker_id = %id, phase = ?removed.phase, "worker deregistered");
        Ok(removed)
    }

    pub fn get(&self, id: &str) -> Option<WorkerRecord> {
        self.lock().get(id).cloned()
    }

    /// Snapshot of every record, in id order.
    pub fn list_all(&self) -> Vec<WorkerRecord> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn count_by_phase(&self, phase: WorkerPhase) -> usize {
        self.lock().values().filter(|r| r.phase == phase).count()
    }

    /// Per-phase counts and Ready load from one critical section.
    pub fn census(&self) -> FleetCensus {
        let records = self.lock();
        let mut census = FleetCensus::default();
        for record in records.values() {
            census.tally(record);
        }
        census
    }

    /// The least-loaded Ready worker with headroom; lowest id breaks ties.
    ///
    /// `None` is the admission-control signal: nothing can take work now.
    pub fn pick_available(&self) -> Option<WorkerRecord> {
        self.lock()
            .values()
            .filter(|r| r.is_available())
            .min_by_key(|r| r.in_flight)
            .cloned()
    }

    /// Atomically claim one unit of capacity on a Ready worker.
    ///
    /// Returns `false` if the worker is missing, not Ready, or full.
    pub fn try_reserve(&self, id: &str) -> bool {
        let mut records = self.lock();
        match records.get_mut(id) {
            Some(record) if record.is_available() => {
                record.in_flight += 1;
                true
            }
            _ => false,
        }
    }

    /// Return one unit of capacity.
    ///
    /// Releasing a worker with nothing in flight is an accounting bug in
    /// the caller; it is reported and the record is left unchanged.
    pub fn release(&self, id: &str) -> RegistryResult<()> {
        let mut records = self.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if record.in_flight == 0 {
            return Err(RegistryError::OverRelease(id.to_string()));
        }
        record.in_flight -= 1;
        Ok(())
    }

    /// Current `in_flight` of a worker.
    pub fn in_flight(&self, id: &str) -> Option<u32> {
        self.lock().get(id).map(|r| r.in_flight)
    }

    /// `{prefix}-{n}` for the smallest `n` not currently registered.
    pub fn next_worker_id(&self, prefix: &str) -> WorkerId {
        let records = self.lock();
        (0u64..)
            .map(|n| format!("{prefix}-{n}"))
            .find(|id| !records.contains_key(id))
            .unwrap_or_else(|| format!("{prefix}-{}", records.len()))
    }

    /// Record the endpoint of a worker that is still coming up and move it
    /// to `Initializing`.
    ///
    /// Returns `false` if the worker has moved on (e.g. started draining)
    /// since the caller's snapshot.
    pub fn mark_initializing(&self, id: &str, endpoint: &str) -> RegistryResult<bool> {
        let mut records = self.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if !record.phase.is_spinning_up() {
            return Ok(false);
        }
        record.endpoint = Some(endpoint.to_string());
        record.set_phase(WorkerPhase::Initializing);
        Ok(true)
    }

    /// Fold one probe result into a worker's health state.
    pub fn record_probe(
        &self,
        id: &str,
        healthy: bool,
        max_failures: u32,
    ) -> RegistryResult<ProbeApplied> {
        let mut records = self.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let previous = record.phase;
        record.apply_probe(healthy, max_failures);
        Ok(ProbeApplied {
            previous,
            record: record.clone(),
        })
    }

    /// Move a Ready worker to `Terminating` so dispatch stops choosing it.
    pub fn begin_drain(&self, id: &str) -> RegistryResult<()> {
        let mut records = self.lock();
        let record = records
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if record.phase != WorkerPhase::Ready {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from: record.phase,
                to: WorkerPhase::Terminating,
            });
        }
        record.set_phase(WorkerPhase::Terminating);
        Ok(())
    }

    /// Move a worker to `Terminating` only if it is still in `phase`.
    ///
    /// Used by evictions decided on a snapshot that may be stale by the
    /// time they run. The record keeps its id reserved until the caller
    /// removes it once the backend has let go of the worker.
    pub fn begin_retire(&self, id: &str, phase: WorkerPhase) -> Option<WorkerRecord> {
        let mut records = self.lock();
        match records.get_mut(id) {
            Some(record) if record.phase == phase => {
                record.set_phase(WorkerPhase::Terminating);
                Some(record.clone())
            }
            _ => None,
        }
    }

    /// The Ready worker with the lowest `in_flight`; lowest id breaks ties.
    pub fn least_loaded_ready(&self) -> Option<WorkerRecord> {
        self.lock()
            .values()
            .filter(|r| r.phase == WorkerPhase::Ready)
            .min_by_key(|r| r.in_flight)
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<WorkerId, WorkerRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(id: &str, in_flight: u32) -> WorkerRecord {
        let mut record = WorkerRecord::ready(id, format!("{id}.local:8000"), 10);
        record.in_flight = in_flight;
        record
    }

    #[test]
    fn add_and_get() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 0)).unwrap();

        let record = registry.get("w-0").unwrap();
        assert_eq!(record.phase, WorkerPhase::Ready);
        assert!(registry.get("w-1").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_id_rejected() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 3)).unwrap();

        let err = registry.add(ready("w-0", 0)).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId("w-0".to_string()));
        // Original record untouched.
        assert_eq!(registry.in_flight("w-0"), Some(3));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_returns_record_and_reports_missing() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 2)).unwrap();

        let removed = registry.remove("w-0").unwrap();
        assert_eq!(removed.in_flight, 2);
        assert!(registry.is_empty());
        assert_eq!(
            registry.remove("w-0").unwrap_err(),
            RegistryError::NotFound("w-0".to_string())
        );
    }

    #[test]
    fn list_all_is_a_snapshot() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 0)).unwrap();

        let snapshot = registry.list_all();
        assert!(registry.try_reserve("w-0"));
        assert_eq!(snapshot[0].in_flight, 0);
        assert_eq!(registry.in_flight("w-0"), Some(1));
    }

    #[test]
    fn count_by_phase_and_census_agree() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 2)).unwrap();
        registry.add(ready("w-1", 5)).unwrap();
        registry.add(WorkerRecord::provisioning("w-2", 10)).unwrap();

        assert_eq!(registry.count_by_phase(WorkerPhase::Ready), 2);
        assert_eq!(registry.count_by_phase(WorkerPhase::Provisioning), 1);
        assert_eq!(registry.count_by_phase(WorkerPhase::Unhealthy), 0);

        let census = registry.census();
        assert_eq!(census.ready, 2);
        assert_eq!(census.live(), 3);
        assert_eq!(census.ready_load, 7);
    }

    #[test]
    fn pick_available_least_loaded() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 3)).unwrap();
        registry.add(ready("w-1", 1)).unwrap();
        registry.add(ready("w-2", 5)).unwrap();

        let picked = registry.pick_available().unwrap();
        assert_eq!(picked.id, "w-1");
        assert_eq!(picked.in_flight, 1);
    }

    #[test]
    fn pick_available_ties_go_to_lowest_id() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-b", 2)).unwrap();
        registry.add(ready("w-a", 2)).unwrap();
        registry.add(ready("w-c", 2)).unwrap();

        assert_eq!(registry.pick_available().unwrap().id, "w-a");
    }

    #[test]
    fn pick_available_skips_full_and_non_ready() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 10)).unwrap();
        registry.add(WorkerRecord::provisioning("w-1", 10)).unwrap();
        let mut draining = ready("w-2", 0);
        draining.phase = WorkerPhase::Terminating;
        registry.add(draining).unwrap();
        let mut sick = ready("w-3", 0);
        sick.phase = WorkerPhase::Unhealthy;
        registry.add(sick).unwrap();

        assert!(registry.pick_available().is_none());

        registry.add(ready("w-4", 9)).unwrap();
        assert_eq!(registry.pick_available().unwrap().id, "w-4");
    }

    #[test]
    fn try_reserve_respects_capacity_and_phase() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 9)).unwrap();

        assert!(registry.try_reserve("w-0"));
        assert!(!registry.try_reserve("w-0"));
        assert_eq!(registry.in_flight("w-0"), Some(10));
        assert!(!registry.try_reserve("missing"));

        registry.add(ready("w-1", 0)).unwrap();
        registry.begin_drain("w-1").unwrap();
        assert!(!registry.try_reserve("w-1"));
    }

    #[test]
    fn concurrent_reservations_never_overbook() {
        use std::thread;

        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 0)).unwrap();

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.try_reserve("w-0"))
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(granted, 10);
        assert_eq!(registry.in_flight("w-0"), Some(10));
    }

    #[test]
    fn concurrent_reservations_from_partial_load() {
        use std::thread;

        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 4)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..5).filter(|_| registry.try_reserve("w-0")).count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 6);
        assert_eq!(registry.in_flight("w-0"), Some(10));
    }

    #[test]
    fn release_decrements() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 2)).unwrap();
        registry.release("w-0").unwrap();
        assert_eq!(registry.in_flight("w-0"), Some(1));
    }

    #[test]
    fn over_release_is_reported_and_state_unchanged() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 0)).unwrap();

        let err = registry.release("w-0").unwrap_err();
        assert_eq!(err, RegistryError::OverRelease("w-0".to_string()));
        assert_eq!(registry.in_flight("w-0"), Some(0));

        assert_eq!(
            registry.release("w-9").unwrap_err(),
            RegistryError::NotFound("w-9".to_string())
        );
    }

    #[test]
    fn release_allowed_while_draining() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 1)).unwrap();
        registry.begin_drain("w-0").unwrap();
        registry.release("w-0").unwrap();
        assert_eq!(registry.in_flight("w-0"), Some(0));
    }

    #[test]
    fn next_worker_id_fills_gaps() {
        let registry = FleetRegistry::new();
        assert_eq!(registry.next_worker_id("worker"), "worker-0");

        registry.add(ready("worker-0", 0)).unwrap();
        registry.add(ready("worker-1", 0)).unwrap();
        registry.add(ready("worker-3", 0)).unwrap();
        assert_eq!(registry.next_worker_id("worker"), "worker-2");

        registry.add(ready("worker-2", 0)).unwrap();
        assert_eq!(registry.next_worker_id("worker"), "worker-4");
    }

    #[test]
    fn mark_initializing_sets_endpoint() {
        let registry = FleetRegistry::new();
        registry.add(WorkerRecord::provisioning("w-0", 10)).unwrap();

        assert!(registry.mark_initializing("w-0", "10.1.1.1:80").unwrap());
        let record = registry.get("w-0").unwrap();
        assert_eq!(record.phase, WorkerPhase::Initializing);
        assert_eq!(record.endpoint.as_deref(), Some("10.1.1.1:80"));
    }

    #[test]
    fn mark_initializing_ignores_settled_workers() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 0)).unwrap();
        assert!(!registry.mark_initializing("w-0", "elsewhere:1").unwrap());
        assert_eq!(registry.get("w-0").unwrap().phase, WorkerPhase::Ready);
        assert!(registry.mark_initializing("nope", "x:1").is_err());
    }

    #[test]
    fn record_probe_debounces_then_recovers() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 0)).unwrap();

        let first = registry.record_probe("w-0", false, 3).unwrap();
        assert!(!first.changed());
        let second = registry.record_probe("w-0", false, 3).unwrap();
        assert_eq!(second.record.phase, WorkerPhase::Ready);
        assert_eq!(second.record.consecutive_health_failures, 2);

        let ok = registry.record_probe("w-0", true, 3).unwrap();
        assert_eq!(ok.record.phase, WorkerPhase::Ready);
        assert_eq!(ok.record.consecutive_health_failures, 0);
    }

    #[test]
    fn unhealthy_worker_refuses_reservations() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 0)).unwrap();
        for _ in 0..3 {
            registry.record_probe("w-0", false, 3).unwrap();
        }
        assert_eq!(registry.get("w-0").unwrap().phase, WorkerPhase::Unhealthy);
        assert!(!registry.try_reserve("w-0"));
    }

    #[test]
    fn begin_drain_requires_ready() {
        let registry = FleetRegistry::new();
        registry.add(WorkerRecord::provisioning("w-0", 10)).unwrap();

        let err = registry.begin_drain("w-0").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
        assert!(registry.begin_drain("w-9").is_err());
    }

    #[test]
    fn begin_retire_checks_current_phase() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 0)).unwrap();

        assert!(registry.begin_retire("w-0", WorkerPhase::Unhealthy).is_none());
        assert_eq!(registry.get("w-0").unwrap().phase, WorkerPhase::Ready);

        let retired = registry.begin_retire("w-0", WorkerPhase::Ready).unwrap();
        assert_eq!(retired.phase, WorkerPhase::Terminating);
        assert_eq!(registry.get("w-0").unwrap().phase, WorkerPhase::Terminating);
        assert!(registry.pick_available().is_none());
    }

    #[test]
    fn retiring_worker_keeps_its_id_reserved() {
        let registry = FleetRegistry::new();
        registry.add(WorkerRecord::provisioning("worker-0", 10)).unwrap();

        registry.begin_retire("worker-0", WorkerPhase::Provisioning).unwrap();

        assert_eq!(registry.next_worker_id("worker"), "worker-1");
        assert_eq!(registry.census().live(), 0);
    }

    #[test]
    fn least_loaded_ready_ignores_other_phases() {
        let registry = FleetRegistry::new();
        registry.add(ready("w-0", 4)).unwrap();
        registry.add(ready("w-1", 10)).unwrap();
        let mut sick = ready("w-2", 0);
        sick.phase = WorkerPhase::Unhealthy;
        registry.add(sick).unwrap();

        assert_eq!(registry.least_loaded_ready().unwrap().id, "w-0");
    }
}
