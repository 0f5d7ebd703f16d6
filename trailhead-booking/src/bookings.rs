use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};
use trailhead_core::identity::Principal;
use trailhead_core::lifecycle::BookingEvent;
use trailhead_core::notify::Notifier;
use trailhead_core::{Booking, BookingError, BookingResult, BookingStore, Listing};
use uuid::Uuid;

use crate::orchestrator::PaymentOrchestrator;

/// Renter/owner-facing booking operations.
pub struct BookingService {
    store: Arc<dyn BookingStore>,
    payments: Arc<PaymentOrchestrator>,
    notifier: Arc<dyn Notifier>,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        payments: Arc<PaymentOrchestrator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            payments,
            notifier,
        }
    }

    /// Visible to the renter and to the owner of the listing.
    pub async fn get_booking(&self, principal: &Principal, booking_id: Uuid) -> BookingResult<Booking> {
        let (booking, listing) = self.load(booking_id).await?;
        if principal.user_id != booking.renter_id && principal.user_id != listing.owner_id {
            return Err(BookingError::Forbidden(format!(
                "booking {} is not yours to view",
                booking_id
            )));
        }
        Ok(booking)
    }

    /// Cancel on behalf of the listing owner or the renter. Cancelling an
    /// already cancelled booking is a no-op.
    pub async fn cancel(
        &self,
        principal: &Principal,
        booking_id: Uuid,
        now: DateTime<Utc>,
    ) -> BookingResult<Booking> {
        let (booking, listing) = self.load(booking_id).await?;

        let event = if principal.user_id == listing.owner_id {
            BookingEvent::OwnerCancel
        } else if principal.user_id == booking.renter_id {
            BookingEvent::RenterCancel
        } else {
            return Err(BookingError::Forbidden(format!(
                "booking {} is not yours to cancel",
                booking_id
            )));
        };

        let (booking, transition) = self.store.apply_event(booking_id, event, now).await?;
        if !transition.is_applied() {
            return Ok(booking);
        }
        info!(booking_id = %booking.id, %event, "booking cancelled");

        // Side effects never undo the cancellation
        if let Err(e) = self.payments.close_pending_sessions(booking.id, now).await {
            error!(booking_id = %booking.id, error = %e, "failed to expire pending sessions");
        }
        self.payments.refund_booking(&booking).await;
        if let Err(e) = self.notifier.booking_cancelled(&booking).await {
            error!(booking_id = %booking.id, error = %e, "cancellation notification failed");
        }

        Ok(booking)
    }

    async fn load(&self, booking_id: Uuid) -> BookingResult<(Booking, Listing)> {
        let booking = self
            .store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| BookingError::booking_not_found(booking_id))?;
        let listing = self
            .store
            .get_listing(booking.listing_id)
            .await?
            .ok_or_else(|| BookingError::listing_not_found(booking.listing_id))?;
        Ok((booking, listing))
    }
}
