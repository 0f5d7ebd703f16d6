use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use trailhead_core::identity::Principal;
use trailhead_core::{
    Booking, BookingError, BookingResult, BookingStore, DateRange, Hold, ListingId,
};
use uuid::Uuid;

/// Places time-bounded holds and owner blocks.
///
/// The free-check and the insert run as one unit of work inside the store,
/// so two overlapping requests on one listing cannot both succeed.
pub struct HoldManager {
    store: Arc<dyn BookingStore>,
    hold_duration: Duration,
}

impl HoldManager {
    pub fn new(store: Arc<dyn BookingStore>, hold_minutes: i64) -> Self {
        Self {
            store,
            hold_duration: Duration::minutes(hold_minutes),
        }
    }

    pub async fn create_hold(
        &self,
        listing_id: ListingId,
        renter_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        guest_count: i32,
        now: DateTime<Utc>,
    ) -> BookingResult<Hold> {
        // 1. Shape of the request
        let dates = DateRange::new(start, end)?;
        let today = now.date_naive();
        if dates.start <= today {
            return Err(BookingError::Validation(format!(
                "stay must start after {}",
                today
            )));
        }
        if guest_count < 1 {
            return Err(BookingError::Validation("guest count must be at least 1".to_string()));
        }

        // 2. Listing policy
        let listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or_else(|| BookingError::listing_not_found(listing_id))?;
        if guest_count > listing.max_guests {
            return Err(BookingError::Validation(format!(
                "listing {} accepts at most {} guests",
                listing_id, listing.max_guests
            )));
        }

        // 3. Atomic free-check + insert
        let booking = Booking::new_hold(&listing, renter_id, dates, guest_count, now, now + self.hold_duration);
        let booking = match self.store.insert_if_free(booking, now).await {
            Ok(booking) => booking,
            Err(err) => {
                let err = BookingError::from(err);
                if matches!(err, BookingError::DateRangeConflict { .. }) {
                    warn!(listing_id, %dates, "hold rejected, dates occupied");
                }
                return Err(err);
            }
        };

        info!(
            booking_id = %booking.id,
            listing_id,
            %dates,
            expires_at = ?booking.hold_expires_at,
            "hold placed"
        );
        Hold::try_from(booking)
    }

    /// Owner-imposed block; occupies dates like a booking but carries no cost.
    pub async fn block_dates(
        &self,
        principal: &Principal,
        listing_id: ListingId,
        start: NaiveDate,
        end: NaiveDate,
        now: DateTime<Utc>,
    ) -> BookingResult<Booking> {
        let dates = DateRange::new(start, end)?;
        if dates.start < now.date_naive() {
            return Err(BookingError::Validation("cannot block past dates".to_string()));
        }

        let listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or_else(|| BookingError::listing_not_found(listing_id))?;
        if listing.owner_id != principal.user_id {
            return Err(BookingError::Forbidden(format!(
                "only the owner of listing {} can block its dates",
                listing_id
            )));
        }

        let block = self
            .store
            .insert_if_free(Booking::new_owner_block(&listing, dates, now), now)
            .await?;

        info!(booking_id = %block.id, listing_id, %dates, "owner block placed");
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{day, june, owner_of, range, renter, seeded_store};
    use trailhead_core::BookingStatus;

    #[tokio::test]
    async fn test_conflict_scenario() {
        let (store, listing) = seeded_store().await;
        let holds = HoldManager::new(store, 20);
        let now = june();

        let a = holds.create_hold(listing.id, Uuid::new_v4(), day(7, 1), day(7, 5), 2, now).await.unwrap();
        assert_eq!(a.booking.status, BookingStatus::Held);
        assert_eq!(a.expires_at, now + Duration::minutes(20));
        assert!(a.idempotency_key.starts_with("hold_"));

        let b = holds.create_hold(listing.id, Uuid::new_v4(), day(7, 3), day(7, 7), 2, now).await;
        assert!(matches!(b, Err(BookingError::DateRangeConflict { listing_id: 1, .. })));

        let c = holds.create_hold(listing.id, Uuid::new_v4(), day(7, 5), day(7, 8), 2, now).await;
        assert!(c.is_ok());
    }

    #[tokio::test]
    async fn test_validation() {
        let (store, listing) = seeded_store().await;
        let holds = HoldManager::new(store, 20);
        let now = june();
        let renter = Uuid::new_v4();

        let cases = [
            (day(7, 5), day(7, 1), 2),  // inverted
            (day(7, 1), day(7, 1), 2),  // empty
            (day(6, 15), day(6, 18), 2), // starts today
            (day(6, 1), day(6, 3), 2),  // past
            (day(7, 1), day(7, 5), 0),  // nobody
            (day(7, 1), day(7, 5), 5),  // over max_guests
        ];
        for (start, end, guests) in cases {
            let result = holds.create_hold(listing.id, renter, start, end, guests, now).await;
            assert!(
                matches!(result, Err(BookingError::Validation(_))),
                "{} -> {} x{} should be rejected",
                start,
                end,
                guests
            );
        }

        let missing = holds.create_hold(42, renter, day(7, 1), day(7, 5), 2, now).await;
        assert!(matches!(missing, Err(BookingError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_overlapping_holds_single_winner() {
        let (store, listing) = seeded_store().await;
        let holds = Arc::new(HoldManager::new(store, 20));
        let now = june();
        let listing_id = listing.id;

        let mut tasks = Vec::new();
        for i in 0..10u32 {
            let holds = holds.clone();
            // Every range overlaps 07-04
            let (start, end) = (day(7, 1 + (i % 3)), day(7, 5 + (i % 2)));
            tasks.push(tokio::spawn(async move {
                holds.create_hold(listing_id, Uuid::new_v4(), start, end, 2, now).await
            }));
        }

        let mut won = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => won += 1,
                Err(BookingError::DateRangeConflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(conflicts, 9);
    }

    #[tokio::test]
    async fn test_owner_block() {
        let (store, listing) = seeded_store().await;
        let holds = HoldManager::new(store, 20);
        let now = june();

        let err = holds.block_dates(&renter(), listing.id, day(8, 1), day(8, 4), now).await.unwrap_err();
        assert!(matches!(err, BookingError::Forbidden(_)));

        let block = holds.block_dates(&owner_of(&listing), listing.id, day(8, 1), day(8, 4), now).await.unwrap();
        assert_eq!(block.status, BookingStatus::Blocked);
        assert_eq!(block.dates, range((8, 1), (8, 4)));

        let hold = holds.create_hold(listing.id, Uuid::new_v4(), day(8, 3), day(8, 6), 2, now).await;
        assert!(matches!(hold, Err(BookingError::DateRangeConflict { .. })));
    }
}
