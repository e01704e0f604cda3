//! Administrative HTTP surface over the execution guard.
//!
//! Read-only status and audit projections, wholesale limits replacement,
//! and the manual emergency stop. Authentication is a gateway concern and
//! stays outside this crate.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::guard::{AuditEntry, AuditFilter, ExecutionGuard, ExecutionLimits, GuardStatus};

pub fn router(guard: Arc<ExecutionGuard>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/audit", get(get_audit))
        .route("/limits", put(put_limits))
        .route("/emergency-stop", post(post_emergency_stop))
        .layer(CorsLayer::permissive())
        .with_state(guard)
}

async fn get_status(State(guard): State<Arc<ExecutionGuard>>) -> Json<GuardStatus> {
    Json(guard.status().await)
}

async fn get_audit(
    State(guard): State<Arc<ExecutionGuard>>,
    Query(filter): Query<AuditFilter>,
) -> Json<Vec<AuditEntry>> {
    Json(guard.audit_logs(&filter).await)
}

async fn put_limits(
    State(guard): State<Arc<ExecutionGuard>>,
    Json(limits): Json<ExecutionLimits>,
) -> StatusCode {
    guard.update_limits(limits).await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
struct EmergencyStopBody {
    reason: String,
}

async fn post_emergency_stop(
    State(guard): State<Arc<ExecutionGuard>>,
    Json(body): Json<EmergencyStopBody>,
) -> StatusCode {
    guard.emergency_stop(&body.reason).await;
    StatusCode::ACCEPTED
}
