//! Admission API: HTTP face of the dispatcher.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/dispatch` | Reserve capacity on a worker (503 when none) |
//! | POST | `/api/v1/workers/{id}/complete` | Return a reserved unit |
//! | GET | `/api/v1/workers` | List workers |
//! | GET | `/api/v1/workers/{id}` | Get one worker |
//! | GET | `/api/v1/fleet` | Census and smoothed load |
//! | GET | `/healthz` | Daemon liveness |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use flock_dispatch::Dispatcher;
use flock_metrics::FleetMetrics;
use flock_state::FleetRegistry;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: FleetRegistry,
    pub dispatcher: Dispatcher,
    pub metrics: Arc<FleetMetrics>,
}

/// Build the complete API router (admission + inspection + metrics).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/dispatch", post(handlers::dispatch))
        .route("/workers", get(handlers::list_workers))
        .route("/workers/{id}", get(handlers::get_worker))
        .route("/workers/{id}/complete", post(handlers::complete))
        .route("/fleet", get(handlers::fleet_status))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
