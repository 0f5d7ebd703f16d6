use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use trailhead_core::identity::Principal;
use trailhead_core::{Booking, BookingError, Hold, ListingId};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HoldRequest {
    pub listing_id: ListingId,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub guest_count: i32,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/bookings/hold", post(create_hold))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/cancel", post(cancel_booking))
}

/// POST /bookings/hold
async fn create_hold(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(req): Json<HoldRequest>,
) -> Result<(StatusCode, Json<Hold>), AppError> {
    let result = state
        .holds
        .create_hold(req.listing_id, principal.user_id, req.start, req.end, req.guest_count, Utc::now())
        .await;

    let outcome = match &result {
        Ok(_) => "placed",
        Err(BookingError::DateRangeConflict { .. }) => "conflict",
        Err(_) => "rejected",
    };
    state.metrics.record_hold(outcome);

    Ok((StatusCode::CREATED, Json(result?)))
}

/// GET /bookings/{id}
async fn get_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.bookings.get_booking(&principal, id).await?))
}

/// POST /bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    Ok(Json(state.bookings.cancel(&principal, id, Utc::now()).await?))
}
