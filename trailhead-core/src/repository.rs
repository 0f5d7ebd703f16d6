use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::lifecycle::{BookingEvent, ReviewReason, Transition};
use crate::models::{
    Booking, DateRange, Listing, ListingId, OccupancyEntry, PaymentSession, PaymentStatus,
    Transaction,
};

/// Result of trying to turn a paid session into a Confirmed booking.
#[derive(Debug, Clone)]
pub enum ConfirmOutcome {
    Confirmed {
        booking: Booking,
        transaction: Transaction,
    },
    /// A transaction with this provider reference already exists.
    AlreadyReconciled(Transaction),
    /// Money was taken but the booking could not be confirmed. The
    /// transaction is recorded with status CANCELLED for operator review.
    NeedsReview {
        booking: Booking,
        transaction: Transaction,
        reason: ReviewReason,
    },
}

/// Persistence boundary for the booking core.
///
/// Methods that change occupancy run as one atomic unit of work, serialized
/// per listing, so a concurrent caller always observes the committed result.
#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn get_listing(&self, id: ListingId) -> Result<Option<Listing>, StoreError>;

    async fn get_booking(&self, id: Uuid) -> Result<Option<Booking>, StoreError>;

    /// Occupancy entries on `listing_id` overlapping `dates` at `now`,
    /// ordered by start date. Expired holds are not included.
    async fn list_occupancy(
        &self,
        listing_id: ListingId,
        dates: DateRange,
        now: DateTime<Utc>,
        exclude: Option<Uuid>,
    ) -> Result<Vec<OccupancyEntry>, StoreError>;

    /// Insert `booking` (a hold or an owner block) if no occupying entry on
    /// its listing overlaps its dates; otherwise `StoreError::Conflict`.
    async fn insert_if_free(
        &self,
        booking: Booking,
        now: DateTime<Utc>,
    ) -> Result<Booking, StoreError>;

    /// Run `event` through the state machine and persist the result.
    async fn apply_event(
        &self,
        booking_id: Uuid,
        event: BookingEvent,
        now: DateTime<Utc>,
    ) -> Result<(Booking, Transition), StoreError>;

    /// Confirm the booking of `transaction` and record the transaction in the
    /// same unit of work. `transaction.provider_reference` is the
    /// de-duplication key.
    async fn confirm_payment(
        &self,
        transaction: Transaction,
        now: DateTime<Utc>,
    ) -> Result<ConfirmOutcome, StoreError>;

    async fn find_transaction(
        &self,
        provider_reference: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    async fn transactions_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// CONFIRMED transactions whose booking has since been cancelled.
    async fn transactions_awaiting_refund(&self) -> Result<Vec<Transaction>, StoreError>;

    async fn mark_refunded(
        &self,
        transaction_id: Uuid,
        refund_reference: &str,
    ) -> Result<(), StoreError>;

    /// Record a new session; any still-pending session of the same booking
    /// is marked EXPIRED.
    async fn open_session(&self, session: PaymentSession) -> Result<PaymentSession, StoreError>;

    async fn get_session(&self, id: &str) -> Result<Option<PaymentSession>, StoreError>;

    /// Sessions of a booking, oldest first.
    async fn sessions_for_booking(
        &self,
        booking_id: Uuid,
    ) -> Result<Vec<PaymentSession>, StoreError>;

    async fn set_session_status(
        &self,
        id: &str,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// CONFIRMED bookings whose stay ended strictly before `day`.
    async fn confirmed_ended_before(&self, day: NaiveDate) -> Result<Vec<Booking>, StoreError>;

    /// HELD bookings whose hold expired at or before `now`.
    async fn expired_holds(&self, now: DateTime<Utc>) -> Result<Vec<Booking>, StoreError>;
}
