use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};
use trailhead_core::lifecycle::BookingEvent;
use trailhead_core::notify::Notifier;
use trailhead_core::{BookingResult, BookingStore, PaymentStatus};

use crate::orchestrator::PaymentOrchestrator;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub completed: usize,
    pub holds_expired: usize,
    pub refunds_issued: usize,
}

/// Periodic maintenance over bookings: completes ended stays, reaps expired
/// holds and retries owed refunds. Every pass is idempotent.
pub struct CompletionSweeper {
    store: Arc<dyn BookingStore>,
    payments: Arc<PaymentOrchestrator>,
    notifier: Arc<dyn Notifier>,
}

impl CompletionSweeper {
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

    /// Transition every Confirmed booking whose stay ended before today to
    /// Completed. Returns how many bookings moved.
    pub async fn sweep(&self, now: DateTime<Utc>) -> BookingResult<usize> {
        let today = now.date_naive();
        let ended = self.store.confirmed_ended_before(today).await?;

        let mut completed = 0;
        for booking in ended {
            match self.store.apply_event(booking.id, BookingEvent::StayEnded, now).await {
                Ok((booking, transition)) if transition.is_applied() => {
                    completed += 1;
                    info!(booking_id = %booking.id, end = %booking.dates.end, "stay completed");
                    if let Err(e) = self.notifier.stay_completed(&booking).await {
                        error!(booking_id = %booking.id, error = %e, "completion notification failed");
                    }
                }
                Ok(_) => debug!(booking_id = %booking.id, "already completed"),
                Err(e) => error!(booking_id = %booking.id, error = %e, "failed to complete stay"),
            }
        }
        Ok(completed)
    }

    /// Cancel holds past their expiry. Expired holds already stop occupying
    /// dates; this only settles their state.
    pub async fn reap_expired_holds(&self, now: DateTime<Utc>) -> BookingResult<usize> {
        let expired = self.store.expired_holds(now).await?;

        let mut reaped = 0;
        for booking in expired {
            let sessions = self.store.sessions_for_booking(booking.id).await?;
            let event = match sessions.last() {
                Some(latest) if latest.status == PaymentStatus::Failed => BookingEvent::PaymentFailed,
                _ => BookingEvent::HoldExpired,
            };

            match self.store.apply_event(booking.id, event, now).await {
                Ok((booking, transition)) if transition.is_applied() => {
                    reaped += 1;
                    info!(booking_id = %booking.id, %event, "expired hold cancelled");
                    if let Err(e) = self.payments.close_pending_sessions(booking.id, now).await {
                        error!(booking_id = %booking.id, error = %e, "failed to expire pending sessions");
                    }
                    if let Err(e) = self.notifier.booking_cancelled(&booking).await {
                        error!(booking_id = %booking.id, error = %e, "cancellation notification failed");
                    }
                }
                Ok(_) => {}
                // Confirmed by a payment that landed between the scan and now
                Err(e) => debug!(booking_id = %booking.id, error = %e, "reaper skip"),
            }
        }
        Ok(reaped)
    }

    /// Retry refunds owed on cancelled bookings.
    pub async fn retry_pending_refunds(&self) -> BookingResult<usize> {
        let owed = self.store.transactions_awaiting_refund().await?;

        let mut refunded = 0;
        for transaction in owed {
            match self.payments.refund_transaction(&transaction).await {
                Ok(_) => refunded += 1,
                Err(e) => error!(
                    booking_id = %transaction.booking_id,
                    transaction_id = %transaction.id,
                    error = %e,
                    "refund retry failed"
                ),
            }
        }
        Ok(refunded)
    }

    /// One maintenance pass. A failing step is logged and does not stop the others.
    pub async fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        match self.sweep(now).await {
            Ok(n) => report.completed = n,
            Err(e) => error!(error = %e, "completion sweep failed"),
        }
        match self.reap_expired_holds(now).await {
            Ok(n) => report.holds_expired = n,
            Err(e) => error!(error = %e, "hold reaper failed"),
        }
        match self.retry_pending_refunds().await {
            Ok(n) => report.refunds_issued = n,
            Err(e) => error!(error = %e, "refund retry failed"),
        }

        report
    }
}
