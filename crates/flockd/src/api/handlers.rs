//! REST API handlers.
//!
//! Dispatch and completion go through the [`Dispatcher`](flock_dispatch::Dispatcher);
//! the read-only routes snapshot the registry.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use flock_dispatch::{DispatchResult, Outcome};
use flock_state::{FleetCensus, RegistryError, WorkerId};

use super::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// A granted dispatch: forward the work to `endpoint`, then complete it on
/// `worker_id`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Assignment {
    pub worker_id: WorkerId,
    pub endpoint: String,
}

/// Completion request body.
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub outcome: Outcome,
}

/// Fleet overview.
#[derive(Debug, Serialize)]
pub struct FleetStatus {
    pub census: FleetCensus,
    pub live: usize,
    pub smoothed_load: Option<f64>,
}

// ── Admission ──────────────────────────────────────────────────

/// POST /api/v1/dispatch
pub async fn dispatch(State(state): State<ApiState>) -> impl IntoResponse {
    match state.dispatcher.try_dispatch() {
        DispatchResult::Assigned {
            worker_id,
            endpoint,
        } => ApiResponse::ok(Assignment {
            worker_id,
            endpoint,
        })
        .into_response(),
        DispatchResult::NoCapacity => {
            error_response("no capacity", StatusCode::SERVICE_UNAVAILABLE).into_response()
        }
    }
}

/// POST /api/v1/workers/{id}/complete
pub async fn complete(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<CompleteRequest>,
) -> impl IntoResponse {
    match state.dispatcher.complete(&id, req.outcome) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e @ RegistryError::NotFound(_)) => {
            error_response(&e.to_string(), StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::CONFLICT).into_response(),
    }
}

// ── Inspection ─────────────────────────────────────────────────

/// GET /api/v1/workers
pub async fn list_workers(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.registry.list_all())
}

/// GET /api/v1/workers/{id}
pub async fn get_worker(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&id) {
        Some(record) => ApiResponse::ok(record).into_response(),
        None => error_response("worker not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// GET /api/v1/fleet
pub async fn fleet_status(State(state): State<ApiState>) -> impl IntoResponse {
    let census = state.registry.census();
    ApiResponse::ok(FleetStatus {
        live: census.live(),
        census,
        smoothed_load: state.metrics.smoothed_load.get(),
    })
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let census = state.registry.census();
    let workers = state.registry.list_all();
    let body = flock_metrics::render_prometheus(&state.metrics.snapshot(), &census, &workers);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use flock_core::DispatchConfig;
    use flock_dispatch::Dispatcher;
    use flock_metrics::FleetMetrics;
    use flock_state::{FleetRegistry, WorkerRecord};

    fn test_state() -> ApiState {
        let registry = FleetRegistry::new();
        let metrics = Arc::new(FleetMetrics::new());
        let dispatcher =
            Dispatcher::new(registry.clone(), &DispatchConfig::default(), metrics.clone());
        ApiState {
            registry,
            dispatcher,
            metrics,
        }
    }

    #[tokio::test]
    async fn dispatch_without_workers_is_503() {
        let resp = dispatch(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn dispatch_with_ready_worker_is_200() {
        let state = test_state();
        state
            .registry
            .add(WorkerRecord::ready("w-0", "10.0.0.1:9000", 2))
            .unwrap();

        let resp = dispatch(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.registry.in_flight("w-0"), Some(1));
    }

    #[tokio::test]
    async fn complete_maps_registry_errors() {
        let state = test_state();
        state
            .registry
            .add(WorkerRecord::ready("w-0", "10.0.0.1:9000", 2))
            .unwrap();

        let body = || {
            Json(CompleteRequest {
                outcome: Outcome::Success,
            })
        };

        let resp = complete(State(state.clone()), Path("w-0".to_string()), body())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = complete(State(state), Path("w-9".to_string()), body())
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_content_type() {
        let resp = prometheus_metrics(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/plain"));
    }
}
