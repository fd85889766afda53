//! HTTP transport (A1): thin axum glue over the Service Coordinator (C12).
//!
//! Routes mirror §6's external interface: `/parse` and `/parse/advanced` for
//! the two request shapes, `/health` and `/stats` for operational status.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::metrics::{metrics, TimingGuard};
use crate::service::{AdvancedParseRequest, Coordinator, ParseRequest};

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/parse", post(parse))
        .route("/parse/advanced", post(parse_advanced))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

async fn parse(State(coordinator): State<Arc<Coordinator>>, Json(req): Json<ParseRequest>) -> impl IntoResponse {
    let _guard = TimingGuard::new("http_parse");
    metrics().record_request();
    match coordinator.process_request(req) {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            metrics().record_error();
            e.into_response()
        }
    }
}

async fn parse_advanced(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<AdvancedParseRequest>,
) -> impl IntoResponse {
    let _guard = TimingGuard::new("http_parse_advanced");
    metrics().record_request();
    match coordinator.process_advanced_request(req) {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            metrics().record_error();
            e.into_response()
        }
    }
}

async fn health(State(coordinator): State<Arc<Coordinator>>) -> impl IntoResponse {
    Json(coordinator.health())
}

async fn stats(State(coordinator): State<Arc<Coordinator>>) -> impl IntoResponse {
    Json(coordinator.stats())
}

/// Background task: periodically reaps leaked parser checkouts and shrinks
/// idle pools, mirroring the teacher's housekeeping-tick pattern.
pub async fn spawn_housekeeping(coordinator: Arc<Coordinator>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let reaped = coordinator.pool().reap_leaked();
        coordinator.pool().shrink_idle();
        if reaped > 0 {
            info!(reaped, "housekeeping tick reaped leaked parser checkouts");
        }
    }
}

/// Background task: samples memory on a configurable cadence and escalates
/// to the resource cleaner when pressure crosses the configured thresholds
/// (§4.4, §4.5).
pub async fn spawn_memory_sampler(coordinator: Arc<Coordinator>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let status = coordinator.memory().check_memory();
        if status.level != crate::memory::MemoryLevel::Normal {
            let strategy = if status.level == crate::memory::MemoryLevel::Critical {
                crate::cleanup::Strategy::Emergency
            } else {
                crate::cleanup::Strategy::Basic
            };
            let outcome = coordinator.cleaner().run(strategy);
            metrics().record_cleanup();
            info!(level = ?status.level, ?strategy, success = outcome.success, "memory sampler triggered cleanup");
        }
    }
}
