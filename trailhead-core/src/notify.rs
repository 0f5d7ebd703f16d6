use async_trait::async_trait;

use crate::models::{Booking, Transaction};

/// Downstream notifications (email, review requests). Failures are reported
/// to the caller for logging only; they never undo a booking transition.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn booking_confirmed(
        &self,
        booking: &Booking,
        transaction: &Transaction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    async fn booking_cancelled(
        &self,
        booking: &Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// The stay is over; used to ask the renter for a review.
    async fn stay_completed(
        &self,
        booking: &Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Notifier that only writes to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn booking_confirmed(
        &self,
        booking: &Booking,
        transaction: &Transaction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(
            booking_id = %booking.id,
            provider_reference = %transaction.provider_reference,
            "booking confirmed"
        );
        Ok(())
    }

    async fn booking_cancelled(
        &self,
        booking: &Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(booking_id = %booking.id, reason = ?booking.cancel_reason, "booking cancelled");
        Ok(())
    }

    async fn stay_completed(
        &self,
        booking: &Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(booking_id = %booking.id, "stay completed, review request due");
        Ok(())
    }
}
