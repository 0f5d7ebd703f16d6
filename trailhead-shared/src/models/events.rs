use chrono::NaiveDate;
use uuid::Uuid;

/// Topic suffixes, prefixed with the configured `kafka.topic_prefix`.
pub const TOPIC_BOOKING_CONFIRMED: &str = "bookings.confirmed";
pub const TOPIC_BOOKING_CANCELLED: &str = "bookings.cancelled";
pub const TOPIC_STAY_COMPLETED: &str = "bookings.completed";

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub listing_id: i64,
    pub renter_id: Uuid,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub provider_reference: String,
    pub amount: i64,
    pub currency: String,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingCancelledEvent {
    pub booking_id: Uuid,
    pub listing_id: i64,
    pub renter_id: Uuid,
    pub reason: String,
    pub timestamp: i64,
}

/// Emitted once per booking when the sweeper closes the stay; downstream
/// consumers use it to send the review request.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct StayCompletedEvent {
    pub booking_id: Uuid,
    pub listing_id: i64,
    pub renter_id: Uuid,
    pub end: NaiveDate,
    pub timestamp: i64,
}
