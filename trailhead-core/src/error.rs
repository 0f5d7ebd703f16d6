use uuid::Uuid;

use crate::lifecycle::IllegalTransition;
use crate::models::{DateRange, ListingId};

/// Failures at the payment provider boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentProviderError {
    #[error("card declined: {0}")]
    CardDeclined(String),
    #[error("invalid payment request: {0}")]
    InvalidRequest(String),
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),
    #[error("payment provider rate limit reached: {0}")]
    RateLimited(String),
    #[error("payment provider rejected our credentials: {0}")]
    Authentication(String),
    #[error("payment provider calls suspended after repeated failures")]
    CircuitOpen,
}

impl PaymentProviderError {
    /// Transient failures worth another attempt with backoff. Declines and
    /// invalid requests are final for the session.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentProviderError::Unavailable(_) | PaymentProviderError::RateLimited(_)
        )
    }
}

/// Persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("dates {dates} on listing {listing_id} are already occupied")]
    Conflict { listing_id: ListingId, dates: DateRange },
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error("database error: {0}")]
    Database(String),
}

/// Error taxonomy of the booking core.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),
    #[error("dates {dates} on listing {listing_id} are not available")]
    DateRangeConflict { listing_id: ListingId, dates: DateRange },
    #[error(transparent)]
    IllegalTransition(#[from] IllegalTransition),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Unauthenticated(String),
    #[error(transparent)]
    Payment(#[from] PaymentProviderError),
    #[error("webhook signature rejected: {0}")]
    WebhookSignature(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl BookingError {
    pub fn booking_not_found(id: Uuid) -> Self {
        BookingError::NotFound(format!("booking {}", id))
    }

    pub fn listing_not_found(id: ListingId) -> Self {
        BookingError::NotFound(format!("listing {}", id))
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => BookingError::NotFound(what),
            StoreError::Conflict { listing_id, dates } => {
                BookingError::DateRangeConflict { listing_id, dates }
            }
            StoreError::IllegalTransition(t) => BookingError::IllegalTransition(t),
            StoreError::Database(msg) => BookingError::Storage(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_provider_errors() {
        assert!(PaymentProviderError::Unavailable("timeout".into()).is_retryable());
        assert!(PaymentProviderError::RateLimited("429".into()).is_retryable());
        assert!(!PaymentProviderError::CardDeclined("insufficient_funds".into()).is_retryable());
        assert!(!PaymentProviderError::InvalidRequest("bad amount".into()).is_retryable());
        assert!(!PaymentProviderError::Authentication("bad key".into()).is_retryable());
        assert!(!PaymentProviderError::CircuitOpen.is_retryable());
    }

    #[test]
    fn test_store_conflict_maps_to_date_range_conflict() {
        let dates = DateRange::new(
            chrono::NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            chrono::NaiveDate::from_ymd_opt(2025, 7, 5).unwrap(),
        )
        .unwrap();
        let err: BookingError = StoreError::Conflict { listing_id: 1, dates }.into();
        assert!(matches!(err, BookingError::DateRangeConflict { listing_id: 1, .. }));
        assert_eq!(err.to_string(), "dates 2025-07-01..2025-07-05 on listing 1 are not available");
    }
}
