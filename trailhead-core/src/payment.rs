use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::PaymentProviderError;
use crate::models::{Booking, PaymentStatus};

/// Metadata keys carried on every provider session.
pub mod metadata_keys {
    pub const BOOKING_ID: &str = "booking_id";
    pub const LISTING_ID: &str = "listing_id";
    pub const RENTER_ID: &str = "renter_id";
    pub const START: &str = "start";
    pub const END: &str = "end";
    pub const GUEST_COUNT: &str = "guest_count";
}

/// Outbound "create session" request.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub booking_id: Uuid,
    pub amount_total: i64,
    pub currency: String,
    pub description: String,
    pub idempotency_key: String,
    /// The session should stop accepting payment once the hold lapses.
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutRequest {
    pub fn for_booking(
        booking: &Booking,
        amount_total: i64,
        description: String,
        idempotency_key: String,
    ) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(metadata_keys::BOOKING_ID.to_string(), booking.id.to_string());
        metadata.insert(metadata_keys::LISTING_ID.to_string(), booking.listing_id.to_string());
        metadata.insert(metadata_keys::RENTER_ID.to_string(), booking.renter_id.to_string());
        metadata.insert(metadata_keys::START.to_string(), booking.dates.start.to_string());
        metadata.insert(metadata_keys::END.to_string(), booking.dates.end.to_string());
        metadata.insert(metadata_keys::GUEST_COUNT.to_string(), booking.guest_count.to_string());

        Self {
            booking_id: booking.id,
            amount_total,
            currency: booking.currency.clone(),
            description,
            idempotency_key,
            expires_at: booking.hold_expires_at,
            metadata,
        }
    }
}

/// The provider's view of a checkout session, from a poll or a webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSession {
    pub id: String,
    pub url: Option<String>,
    pub status: PaymentStatus,
    /// Provider's id for the completed payment; the reconciliation key.
    pub payment_reference: Option<String>,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ProviderSession {
    pub fn booking_id(&self) -> Option<Uuid> {
        self.metadata
            .get(metadata_keys::BOOKING_ID)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a hosted checkout session. The idempotency key makes a retried
    /// request return the same session.
    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<ProviderSession, PaymentProviderError>;

    async fn retrieve_session(&self, session_id: &str)
        -> Result<ProviderSession, PaymentProviderError>;

    /// Close an open session so it can no longer be paid. Expiring a
    /// session that is already expired is not an error.
    async fn expire_session(&self, session_id: &str) -> Result<(), PaymentProviderError>;

    /// Refund a captured payment; returns the provider's refund id.
    async fn refund(
        &self,
        payment_reference: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<String, PaymentProviderError>;
}
