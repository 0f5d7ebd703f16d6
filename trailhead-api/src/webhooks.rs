use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use trailhead_booking::provider::parse_webhook;
use trailhead_core::BookingError;

use crate::error::AppError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

pub fn routes() -> Router<AppState> {
    Router::new().route("/payments/webhook", post(handle_webhook))
}

/// POST /payments/webhook
/// Provider push. The raw body is verified before anything in it is trusted.
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    // 1. Signature
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| BookingError::WebhookSignature("missing signature header".to_string()))?;
    if let Err(e) = state.webhooks.verify(&body, signature, Utc::now()) {
        tracing::warn!(error = %e, "webhook rejected");
        return Err(e.into());
    }

    // 2. Event
    let Some(session) = parse_webhook(&body)? else {
        return Ok(Json(json!({ "received": true })));
    };
    tracing::info!(session_id = %session.id, status = session.status.as_str(), "payment webhook");

    // 3. Reconcile
    let result = state.payments.reconcile(session, Utc::now()).await?;
    state.metrics.record_reconciliation(result.outcome());

    Ok(Json(json!({ "received": true, "result": result.outcome() })))
}
