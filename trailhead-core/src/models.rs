use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BookingError;

pub type ListingId = i64;

// ============================================================================
// Date ranges
// ============================================================================

/// Whole-night stay `[start, end)`. Checkout day `end` is free for the next guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, BookingError> {
        if start >= end {
            return Err(BookingError::Validation(format!(
                "start date {} must be before end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Half-open overlap test: `start_A < end_B AND start_B < end_A`.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn nights(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_days()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

// ============================================================================
// Listing
// ============================================================================

/// A rentable camping spot. Maintained by the listing service; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    pub owner_id: Uuid,
    pub title: String,
    /// Minor currency units.
    pub nightly_price: i64,
    pub currency: String,
    pub max_guests: i32,
}

impl Listing {
    pub fn base_cost(&self, dates: &DateRange) -> i64 {
        self.nightly_price * dates.nights()
    }
}

// ============================================================================
// Booking
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Held,
    Confirmed,
    Cancelled,
    Completed,
    /// Owner-imposed block; occupies dates but never carries a payment.
    Blocked,
}

impl BookingStatus {
    pub const ALL: [BookingStatus; 5] = [
        BookingStatus::Held,
        BookingStatus::Confirmed,
        BookingStatus::Cancelled,
        BookingStatus::Completed,
        BookingStatus::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Held => "HELD",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Completed => "COMPLETED",
            BookingStatus::Blocked => "BLOCKED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Completed)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BookingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown booking status: {}", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub listing_id: ListingId,
    /// The renter; for owner blocks, the owner who placed the block.
    pub renter_id: Uuid,
    #[serde(flatten)]
    pub dates: DateRange,
    pub guest_count: i32,
    /// Nights x nightly price, minor units. The service fee is not included.
    pub base_cost: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub hold_expires_at: Option<DateTime<Utc>>,
    pub idempotency_key: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// A fresh hold on `dates`, expiring at `expires_at`.
    pub fn new_hold(
        listing: &Listing,
        renter_id: Uuid,
        dates: DateRange,
        guest_count: i32,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            listing_id: listing.id,
            renter_id,
            dates,
            guest_count,
            base_cost: listing.base_cost(&dates),
            currency: listing.currency.clone(),
            status: BookingStatus::Held,
            hold_expires_at: Some(expires_at),
            idempotency_key: Some(format!("hold_{}", Uuid::new_v4().simple())),
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_owner_block(listing: &Listing, dates: DateRange, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            listing_id: listing.id,
            renter_id: listing.owner_id,
            dates,
            guest_count: 0,
            base_cost: 0,
            currency: listing.currency.clone(),
            status: BookingStatus::Blocked,
            hold_expires_at: None,
            idempotency_key: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_hold_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == BookingStatus::Held
            && self.hold_expires_at.map_or(false, |expires_at| expires_at <= now)
    }

    /// How this booking occupies its dates at `now`, if at all.
    /// Expired holds are ignored without needing to be reaped first.
    pub fn occupancy_kind(&self, now: DateTime<Utc>) -> Option<OccupancyKind> {
        match self.status {
            BookingStatus::Held if self.is_hold_expired(now) => None,
            BookingStatus::Held => Some(OccupancyKind::Held),
            BookingStatus::Confirmed => Some(OccupancyKind::Confirmed),
            BookingStatus::Completed => Some(OccupancyKind::Completed),
            BookingStatus::Blocked => Some(OccupancyKind::OwnerBlocked),
            BookingStatus::Cancelled => None,
        }
    }

    pub fn occupancy(&self, now: DateTime<Utc>) -> Option<OccupancyEntry> {
        self.occupancy_kind(now).map(|kind| OccupancyEntry {
            booking_id: self.id,
            listing_id: self.listing_id,
            dates: self.dates,
            kind,
        })
    }
}

/// A booking in the Held state, as handed back to the client that placed it.
/// Serializes as the underlying booking; the hold fields mirror it.
#[derive(Debug, Clone, Serialize)]
pub struct Hold {
    #[serde(flatten)]
    pub booking: Booking,
    #[serde(skip)]
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub idempotency_key: String,
}

impl TryFrom<Booking> for Hold {
    type Error = BookingError;

    fn try_from(booking: Booking) -> Result<Self, Self::Error> {
        match (booking.status, booking.hold_expires_at, booking.idempotency_key.clone()) {
            (BookingStatus::Held, Some(expires_at), Some(idempotency_key)) => Ok(Hold {
                booking,
                expires_at,
                idempotency_key,
            }),
            _ => Err(BookingError::Validation(format!(
                "booking {} is not an active hold",
                booking.id
            ))),
        }
    }
}

// ============================================================================
// Occupancy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OccupancyKind {
    Held,
    Confirmed,
    Completed,
    OwnerBlocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccupancyEntry {
    pub booking_id: Uuid,
    pub listing_id: ListingId,
    #[serde(flatten)]
    pub dates: DateRange,
    pub kind: OccupancyKind,
}

// ============================================================================
// Payment sessions and transactions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Expired => "EXPIRED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            "EXPIRED" => Ok(PaymentStatus::Expired),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// Local record of a provider checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSession {
    pub id: String,
    pub booking_id: Uuid,
    pub base_amount: i64,
    pub service_fee: i64,
    pub amount_total: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub redirect_url: Option<String>,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Confirmed,
    /// Money received for a booking that could not be confirmed; awaits review.
    Cancelled,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Confirmed => "CONFIRMED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Refunded => "REFUNDED",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONFIRMED" => Ok(TransactionStatus::Confirmed),
            "CANCELLED" => Ok(TransactionStatus::Cancelled),
            "REFUNDED" => Ok(TransactionStatus::Refunded),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Immutable financial record; `provider_reference` is unique across the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub session_id: Option<String>,
    pub provider_reference: String,
    pub base_amount: i64,
    pub service_fee: i64,
    pub amount: i64,
    pub currency: String,
    pub status: TransactionStatus,
    pub refund_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn listing() -> Listing {
        Listing {
            id: 1,
            owner_id: Uuid::new_v4(),
            title: "Riverside pitch".to_string(),
            nightly_price: 4000,
            currency: "usd".to_string(),
            max_guests: 4,
        }
    }

    #[test]
    fn test_range_rejects_empty_and_inverted() {
        assert!(DateRange::new(day(7, 1), day(7, 1)).is_err());
        assert!(DateRange::new(day(7, 5), day(7, 1)).is_err());
        assert_eq!(DateRange::new(day(7, 1), day(7, 5)).unwrap().nights(), 4);
    }

    #[test]
    fn test_half_open_overlap() {
        let a = DateRange::new(day(7, 1), day(7, 5)).unwrap();
        let b = DateRange::new(day(7, 3), day(7, 7)).unwrap();
        let touching = DateRange::new(day(7, 5), day(7, 8)).unwrap();
        let inside = DateRange::new(day(7, 2), day(7, 3)).unwrap();

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(a.overlaps(&inside));
        assert!(!a.overlaps(&touching));
        assert!(!touching.overlaps(&a));
    }

    #[test]
    fn test_expired_hold_does_not_occupy() {
        let now = Utc::now();
        let dates = DateRange::new(day(7, 1), day(7, 5)).unwrap();
        let hold = Booking::new_hold(&listing(), Uuid::new_v4(), dates, 2, now, now + Duration::minutes(20));

        assert_eq!(hold.base_cost, 16000);
        assert_eq!(hold.occupancy_kind(now), Some(OccupancyKind::Held));
        assert_eq!(hold.occupancy_kind(now + Duration::minutes(20)), None);
        assert!(hold.is_hold_expired(now + Duration::minutes(21)));
    }

    #[test]
    fn test_owner_block_occupancy() {
        let dates = DateRange::new(day(8, 1), day(8, 3)).unwrap();
        let block = Booking::new_owner_block(&listing(), dates, Utc::now());
        assert_eq!(block.occupancy_kind(Utc::now()), Some(OccupancyKind::OwnerBlocked));
        assert_eq!(block.base_cost, 0);
        assert!(Hold::try_from(block).is_err());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in BookingStatus::ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert!("PENDING".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn test_hold_serializes_flat() {
        let now = Utc::now();
        let dates = DateRange::new(day(7, 1), day(7, 5)).unwrap();
        let booking = Booking::new_hold(&listing(), Uuid::new_v4(), dates, 2, now, now + Duration::minutes(20));
        let hold = Hold::try_from(booking).unwrap();

        let json = serde_json::to_value(&hold).unwrap();
        assert_eq!(json["status"], "HELD");
        assert_eq!(json["start"], "2025-07-01");
        assert!(json["idempotency_key"].as_str().unwrap().starts_with("hold_"));
    }
}
