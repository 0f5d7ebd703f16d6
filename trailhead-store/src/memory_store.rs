use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use trailhead_core::lifecycle::{confirmation_blocker, BookingEvent, Transition};
use trailhead_core::{
    Booking, BookingStatus, BookingStore, ConfirmOutcome, DateRange, Listing, ListingId,
    OccupancyEntry, PaymentSession, PaymentStatus, StoreError, Transaction, TransactionStatus,
};
use uuid::Uuid;

#[derive(Default)]
struct State {
    listings: HashMap<ListingId, Listing>,
    bookings: HashMap<Uuid, Booking>,
    sessions: HashMap<String, PaymentSession>,
    transactions: Vec<Transaction>,
}

impl State {
    fn occupancy(
        &self,
        listing_id: ListingId,
        dates: DateRange,
        now: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Vec<OccupancyEntry> {
        let mut entries: Vec<OccupancyEntry> = self
            .bookings
            .values()
            .filter(|b| b.listing_id == listing_id && Some(b.id) != exclude)
            .filter(|b| b.dates.overlaps(&dates))
            .filter_map(|b| b.occupancy(now))
            .collect();
        entries.sort_by_key(|e| e.dates.start);
        entries
    }

    fn transaction_by_reference(&self, provider_reference: &str) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|t| t.provider_reference == provider_reference)
    }
}

/// In-process `BookingStore` for tests and local runs.
///
/// One lock guards all state, so every method is a single atomic step.
#[derive(Clone, Default)]
pub struct MemoryBookingStore {
    state: Arc<Mutex<State>>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a listing; the listing service owns these in production.
    pub async fn insert_listing(&self, listing: Listing) {
        self.state.lock().await.listings.insert(listing.id, listing);
    }
}

#[async_trait]
impl BookingStore for MemoryBookingStore {
    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>, StoreError> {
        Ok(self.state.lock().await.listings.get(&id).cloned())
    }

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError> {
        Ok(self.state.lock().await.bookings.get(&id).cloned())
    }

    async fn list_occupancy(
        &self,
        listing_id: ListingId,
        dates: DateRange,
        now: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<OccupancyEntry>, StoreError> {
        Ok(self.state.lock().await.occupancy(listing_id, dates, now, exclude))
    }

    async fn insert_if_free(
        &self,
        booking: Booking,
        now: DateTime<Utc>,
    ) -> Result<Booking, StoreError> {
        let mut state = self.state.lock().await;

        if !state.listings.contains_key(&booking.listing_id) {
            return Err(StoreError::NotFound(format!("listing {}", booking.listing_id)));
        }
        if !state
            .occupancy(booking.listing_id, booking.dates, now, Some(booking.id))
            .is_empty()
        {
            return Err(StoreError::Conflict {
                listing_id: booking.listing_id,
                dates: booking.dates,
            });
        }

        state.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    async fn apply_event(
        &self,
        booking_id: Uuid,
        event: BookingEvent,
        now: DateTime<Utc>,
    ) -> Result<(Booking, Transition), StoreError> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", booking_id)))?;

        let transition = booking.apply(event, now)?;
        Ok((booking.clone(), transition))
    }

    async fn confirm_payment(
        &self,
        mut transaction: Transaction,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, StoreError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.transaction_by_reference(&transaction.provider_reference) {
            return Ok(ConfirmOutcome::AlreadyReconciled(existing.clone()));
        }

        let booking = state
            .bookings
            .get(&transaction.booking_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", transaction.booking_id)))?;

        let dates_free = !booking.is_hold_expired(now)
            || state
                .occupancy(booking.listing_id, booking.dates, now, Some(booking.id))
                .is_empty();

        match confirmation_blocker(&booking, dates_free, now) {
            None => {
                let mut booking = booking;
                booking.apply(BookingEvent::PaymentConfirmed, now)?;
                transaction.status = TransactionStatus::Confirmed;

                state.bookings.insert(booking.id, booking.clone());
                state.transactions.push(transaction.clone());
                Ok(ConfirmOutcome::Confirmed { booking, transaction })
            }
            Some(reason) => {
                transaction.status = TransactionStatus::Cancelled;
                state.transactions.push(transaction.clone());
                Ok(ConfirmOutcome::NeedsReview {
                    booking,
                    transaction,
                    reason,
                })
            }
        }
    }

    async fn find_transaction(
        &self,
        provider_reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .transaction_by_reference(provider_reference)
            .cloned())
    }

    async fn transactions_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn transactions_awaiting_refund(&self) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.status == TransactionStatus::Confirmed)
            .filter(|t| {
                state
                    .bookings
                    .get(&t.booking_id)
                    .map_or(false, |b| b.status == BookingStatus::Cancelled)
            })
            .cloned()
            .collect())
    }

    async fn mark_refunded(
        &self,
        transaction_id: Uuid,
        refund_reference: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let transaction = state
            .transactions
            .iter_mut()
            .find(|t| t.id == transaction_id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", transaction_id)))?;

        transaction.status = TransactionStatus::Refunded;
        transaction.refund_reference = Some(refund_reference.to_string());
        Ok(())
    }

    async fn open_session(&self, session: PaymentSession) -> Result<PaymentSession, StoreError> {
        let mut state = self.state.lock().await;

        for existing in state.sessions.values_mut() {
            if existing.booking_id == session.booking_id
                && existing.status == PaymentStatus::Pending
                && existing.id != session.id
            {
                existing.status = PaymentStatus::Expired;
                existing.updated_at = session.created_at;
            }
        }

        state
            .sessions
            .entry(session.id.clone())
            .or_insert_with(|| session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<PaymentSession>, StoreError> {
        Ok(self.state.lock().await.sessions.get(id).cloned())
    }

    async fn sessions_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<PaymentSession>, StoreError> {
        let state = self.state.lock().await;
        let mut sessions: Vec<PaymentSession> = state
            .sessions
            .values()
            .filter(|s| s.booking_id == booking_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn set_session_status(
        &self,
        id: &str,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("payment session {}", id)))?;

        session.status = status;
        session.updated_at = now;
        Ok(())
    }

    async fn confirmed_ended_before(&self, day: NaiveDate) -> Result<Vec<Booking>, StoreError> {
        let state = self.state.lock().await;
        let mut ended: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.status == BookingStatus::Confirmed && b.dates.end < day)
            .cloned()
            .collect();
        ended.sort_by_key(|b| b.dates.end);
        Ok(ended)
    }

    async fn expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .bookings
            .values()
            .filter(|b| b.is_hold_expired(now))
            .cloned()
            .collect())
    }
}
