use chrono::{DateTime, Utc};
use std::sync::Arc;
use trailhead_core::{BookingError, BookingResult, BookingStore, DateRange, ListingId, OccupancyEntry};
use uuid::Uuid;

/// Read-only view over the occupancy of each listing.
///
/// Occupancy is derived from bookings: unexpired holds, confirmed and
/// completed stays, and owner blocks. The overlap predicate is evaluated by
/// the store.
pub struct AvailabilityLedger {
    store: Arc<dyn BookingStore>,
}

impl AvailabilityLedger {
    pub fn new(store: Arc<dyn BookingStore>) -> Self {
        Self { store }
    }

    /// `true` iff nothing occupies any night of `dates`. `exclude` skips the
    /// booking being re-evaluated.
    pub async fn is_range_free(
        &self,
        listing_id: ListingId,
        dates: DateRange,
        now: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> BookingResult<bool> {
        let taken = self
            .store
            .list_occupancy(listing_id, dates, now, exclude)
            .await?;
        Ok(taken.is_empty())
    }

    pub async fn list_occupancy(
        &self,
        listing_id: ListingId,
        dates: DateRange,
        now: DateTime<Utc>,
    ) -> BookingResult<Vec<OccupancyEntry>> {
        if self.store.get_listing(listing_id).await?.is_none() {
            return Err(BookingError::listing_not_found(listing_id));
        }
        Ok(self.store.list_occupancy(listing_id, dates, now, None).await?)
    }
}
