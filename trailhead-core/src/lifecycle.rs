//! Booking state machine.
//!
//! ```text
//! Held ──PaymentConfirmed──▶ Confirmed ──StayEnded──▶ Completed
//!  │                            │
//!  └─HoldExpired / PaymentFailed / OwnerCancel / RenterCancel─▶ Cancelled
//!                               └─OwnerCancel / RenterCancel──▶ Cancelled
//! Blocked ──OwnerCancel──▶ Cancelled
//! ```
//!
//! Every (state, event) pair is either a transition, an idempotent no-op
//! (redelivery of an event that already took effect) or an `IllegalTransition`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Booking, BookingStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingEvent {
    PaymentConfirmed,
    PaymentFailed,
    HoldExpired,
    OwnerCancel,
    RenterCancel,
    StayEnded,
}

impl BookingEvent {
    pub const ALL: [BookingEvent; 6] = [
        BookingEvent::PaymentConfirmed,
        BookingEvent::PaymentFailed,
        BookingEvent::HoldExpired,
        BookingEvent::OwnerCancel,
        BookingEvent::RenterCancel,
        BookingEvent::StayEnded,
    ];

    /// Events whose only legal effect is moving a booking to Cancelled.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            BookingEvent::PaymentFailed
                | BookingEvent::HoldExpired
                | BookingEvent::OwnerCancel
                | BookingEvent::RenterCancel
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingEvent::PaymentConfirmed => "PAYMENT_CONFIRMED",
            BookingEvent::PaymentFailed => "PAYMENT_FAILED",
            BookingEvent::HoldExpired => "HOLD_EXPIRED",
            BookingEvent::OwnerCancel => "OWNER_CANCEL",
            BookingEvent::RenterCancel => "RENTER_CANCEL",
            BookingEvent::StayEnded => "STAY_ENDED",
        }
    }
}

impl fmt::Display for BookingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied {
        from: BookingStatus,
        to: BookingStatus,
    },
    /// The event was already applied; nothing changes.
    Unchanged(BookingStatus),
}

impl Transition {
    pub fn status(&self) -> BookingStatus {
        match self {
            Transition::Applied { to, .. } => *to,
            Transition::Unchanged(status) => *status,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event {event} is not permitted for a booking in state {from}")]
pub struct IllegalTransition {
    pub from: BookingStatus,
    pub event: BookingEvent,
}

/// Pure transition function.
pub fn transition(from: BookingStatus, event: BookingEvent) -> Result<Transition, IllegalTransition> {
    use BookingEvent::*;
    use BookingStatus::*;

    let to = match (from, event) {
        (Held, PaymentConfirmed) => Confirmed,
        (Held, PaymentFailed | HoldExpired | OwnerCancel | RenterCancel) => Cancelled,
        (Confirmed, OwnerCancel | RenterCancel) => Cancelled,
        (Confirmed, StayEnded) => Completed,
        (Blocked, OwnerCancel) => Cancelled,

        // Redelivery
        (Confirmed, PaymentConfirmed) | (Completed, StayEnded) => {
            return Ok(Transition::Unchanged(from))
        }
        (Cancelled, e) if e.is_cancellation() => return Ok(Transition::Unchanged(from)),

        _ => return Err(IllegalTransition { from, event }),
    };

    Ok(Transition::Applied { from, to })
}

impl Booking {
    /// Apply `event` in place. On an applied transition the status and
    /// `updated_at` change; cancellations record the triggering event.
    pub fn apply(
        &mut self,
        event: BookingEvent,
        now: DateTime<Utc>,
    ) -> Result<Transition, IllegalTransition> {
        let outcome = transition(self.status, event)?;
        if let Transition::Applied { to, .. } = outcome {
            self.status = to;
            self.updated_at = now;
            if to == BookingStatus::Cancelled {
                self.cancel_reason = Some(event.as_str().to_string());
            }
        }
        Ok(outcome)
    }
}

// ============================================================================
// Confirmation guard
// ============================================================================

/// Why a paid session could not be turned into a Confirmed booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "reason")]
pub enum ReviewReason {
    /// The booking had left Held (cancelled, reaped, or already confirmed
    /// under another payment).
    NotHeld { status: BookingStatus },
    /// The hold lapsed and its dates were taken before the payment landed.
    HoldLapsedDatesTaken,
}

impl fmt::Display for ReviewReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewReason::NotHeld { status } => write!(f, "booking is {}, not HELD", status),
            ReviewReason::HoldLapsedDatesTaken => {
                f.write_str("hold expired and its dates are now occupied")
            }
        }
    }
}

/// Decide whether a paid booking may be confirmed. `dates_free` reports
/// whether the booking's range is free when the booking itself is excluded;
/// it only matters for a hold that expired before the payment arrived.
pub fn confirmation_blocker(
    booking: &Booking,
    dates_free: bool,
    now: DateTime<Utc>,
) -> Option<ReviewReason> {
    if booking.status != BookingStatus::Held {
        return Some(ReviewReason::NotHeld {
            status: booking.status,
        });
    }
    if booking.is_hold_expired(now) && !dates_free {
        return Some(ReviewReason::HoldLapsedDatesTaken);
    }
    None
}
