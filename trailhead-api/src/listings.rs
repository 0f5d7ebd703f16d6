use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use trailhead_core::identity::Principal;
use trailhead_core::{Booking, DateRange, ListingId, OccupancyEntry};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub listing_id: ListingId,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub available: bool,
    pub occupancy: Vec<OccupancyEntry>,
}

/// Read-only listing routes; no principal needed.
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/listings/{id}/availability", get(availability))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/listings/{id}/blocks", post(block_dates))
}

/// GET /listings/{id}/availability?start=..&end=..
async fn availability(
    State(state): State<AppState>,
    Path(listing_id): Path<ListingId>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<AvailabilityResponse>, AppError> {
    let dates = DateRange::new(query.start, query.end)?;
    let occupancy = state.ledger.list_occupancy(listing_id, dates, Utc::now()).await?;

    Ok(Json(AvailabilityResponse {
        listing_id,
        start: dates.start,
        end: dates.end,
        available: occupancy.is_empty(),
        occupancy,
    }))
}

/// POST /listings/{id}/blocks
async fn block_dates(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(listing_id): Path<ListingId>,
    Json(range): Json<RangeQuery>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let block = state
        .holds
        .block_dates(&principal, listing_id, range.start, range.end, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(block)))
}
