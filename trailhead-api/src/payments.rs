use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use trailhead_booking::{ReconciliationResult, SessionHandle};
use trailhead_core::identity::Principal;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SessionRequest {
    pub booking_id: Uuid,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments/session", post(create_session))
        .route("/payments/session/{id}", get(poll_session))
}

/// POST /payments/session
async fn create_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<SessionHandle>, AppError> {
    let handle = state
        .payments
        .create_session(&principal, req.booking_id, Utc::now())
        .await?;
    Ok(Json(handle))
}

/// GET /payments/session/{id}
/// Reconcile by asking the provider directly, for when the webhook is late.
async fn poll_session(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<String>,
) -> Result<Json<ReconciliationResult>, AppError> {
    let result = state.payments.poll_session(&principal, &id, Utc::now()).await?;
    state.metrics.record_reconciliation(result.outcome());
    Ok(Json(result))
}
