//! Prometheus text exposition format.
//!
//! Renders control-plane counters, the fleet census, and per-worker load
//! for scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use flock_state::{FleetCensus, WorkerPhase, WorkerRecord};

use crate::collector::MetricsSnapshot;

/// Render counters, phase gauges, and per-worker gauges.
///
/// The smoothed load gauge is omitted until the autoscaler has ticked.
pub fn render_prometheus(
    counters: &MetricsSnapshot,
    census: &FleetCensus,
    workers: &[WorkerRecord],
) -> String {
    let mut out = String::new();

    let counter_rows: [(&str, &str, u64); 18] = [
        (
            "flock_dispatch_assigned_total",
            "Work units assigned to a worker.",
            counters.dispatch_assigned,
        ),
        (
            "flock_dispatch_no_capacity_total",
            "Dispatch attempts answered with no capacity.",
            counters.dispatch_no_capacity,
        ),
        (
            "flock_dispatch_conflicts_total",
            "Reservations lost to a concurrent dispatch.",
            counters.dispatch_conflicts,
        ),
        (
            "flock_completions_success_total",
            "Work units completed successfully.",
            counters.completions_success,
        ),
        (
            "flock_completions_failure_total",
            "Work units completed with failure.",
            counters.completions_failure,
        ),
        (
            "flock_over_releases_total",
            "Completions reported for a worker with nothing in flight.",
            counters.over_releases,
        ),
        (
            "flock_registry_errors_total",
            "Registry invariant violations.",
            counters.registry_errors,
        ),
        (
            "flock_launches_total",
            "Workers launched.",
            counters.launches,
        ),
        (
            "flock_launch_failures_total",
            "Worker launches that failed.",
            counters.launch_failures,
        ),
        (
            "flock_drains_completed_total",
            "Scale-down drains that reached zero in flight.",
            counters.drains_completed,
        ),
        (
            "flock_drains_forced_total",
            "Scale-down drains cut short by the drain timeout.",
            counters.drains_forced,
        ),
        (
            "flock_terminations_total",
            "Workers terminated.",
            counters.terminations,
        ),
        (
            "flock_terminate_failures_total",
            "Worker terminations that failed.",
            counters.terminate_failures,
        ),
        (
            "flock_probe_failures_total",
            "Failed health probes.",
            counters.probe_failures,
        ),
        (
            "flock_status_failures_total",
            "Failed backend status queries.",
            counters.status_failures,
        ),
        (
            "flock_evictions_total",
            "Workers evicted after staying unhealthy.",
            counters.evictions,
        ),
        (
            "flock_provisioning_expired_total",
            "Workers abandoned while still provisioning.",
            counters.provisioning_expired,
        ),
        (
            "flock_provisioning_lost_total",
            "Provisioning workers the backend stopped reporting.",
            counters.provisioning_lost,
        ),
    ];

    for (name, help, value) in counter_rows {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name} {value}");
    }

    out.push_str("# HELP flock_workers Workers by lifecycle phase.\n");
    out.push_str("# TYPE flock_workers gauge\n");
    for phase in WorkerPhase::ALL {
        let _ = writeln!(
            out,
            "flock_workers{{phase=\"{}\"}} {}",
            phase.as_str(),
            census.count(phase)
        );
    }

    out.push_str("# HELP flock_ready_in_flight Work units in flight across Ready workers.\n");
    out.push_str("# TYPE flock_ready_in_flight gauge\n");
    let _ = writeln!(out, "flock_ready_in_flight {}", census.ready_load);

    out.push_str("# HELP flock_ready_capacity Total capacity across Ready workers.\n");
    out.push_str("# TYPE flock_ready_capacity gauge\n");
    let _ = writeln!(out, "flock_ready_capacity {}", census.ready_capacity);

    if let Some(load) = counters.smoothed_load {
        out.push_str("# HELP flock_smoothed_load Windowed mean of the load signal.\n");
        out.push_str("# TYPE flock_smoothed_load gauge\n");
        let _ = writeln!(out, "flock_smoothed_load {load:.2}");
    }

    out.push_str("# HELP flock_worker_in_flight Work units in flight per worker.\n");
    out.push_str("# TYPE flock_worker_in_flight gauge\n");
    for w in workers {
        let _ = writeln!(
            out,
            "flock_worker_in_flight{{worker=\"{}\",phase=\"{}\"}} {}",
            w.id,
            w.phase.as_str(),
            w.in_flight
        );
    }

    out.push_str("# HELP flock_worker_capacity Capacity per worker.\n");
    out.push_str("# TYPE flock_worker_capacity gauge\n");
    for w in workers {
        let _ = writeln!(
            out,
            "flock_worker_capacity{{worker=\"{}\"}} {}",
            w.id, w.capacity
        );
    }

    out
}
