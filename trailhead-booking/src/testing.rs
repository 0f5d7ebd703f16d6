//! Fixtures shared by the service tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use trailhead_core::identity::Principal;
use trailhead_core::notify::Notifier;
use trailhead_core::{Booking, BookingStore, DateRange, Listing, Transaction};
use trailhead_store::MemoryBookingStore;
use uuid::Uuid;

use crate::orchestrator::PaymentOrchestrator;
use crate::provider::MockPaymentProvider;
use crate::resilience::{CircuitBreaker, ProviderGuard, RetryPolicy};

pub fn day(m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, m, d).unwrap()
}

pub fn range(from: (u32, u32), to: (u32, u32)) -> DateRange {
    DateRange::new(day(from.0, from.1), day(to.0, to.1)).unwrap()
}

/// Mid-June 2025, before every stay used in the tests.
pub fn june() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
}

pub fn listing(id: i64) -> Listing {
    Listing {
        id,
        owner_id: Uuid::new_v4(),
        title: "Riverside pitch".to_string(),
        nightly_price: 4000,
        currency: "usd".to_string(),
        max_guests: 4,
    }
}

pub fn renter() -> Principal {
    Principal {
        user_id: Uuid::new_v4(),
        email: None,
        is_owner: false,
    }
}

pub fn owner_of(listing: &Listing) -> Principal {
    Principal {
        user_id: listing.owner_id,
        email: None,
        is_owner: true,
    }
}

pub async fn seeded_store() -> (Arc<MemoryBookingStore>, Listing) {
    let store = Arc::new(MemoryBookingStore::new());
    let listing = listing(1);
    store.insert_listing(listing.clone()).await;
    (store, listing)
}

pub fn fast_guard() -> ProviderGuard {
    ProviderGuard::new(
        RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            attempt_timeout: Duration::from_secs(1),
        },
        CircuitBreaker::new("payment-provider", 5, Duration::from_secs(30)),
    )
}

pub fn orchestrator(
    store: Arc<dyn BookingStore>,
    provider: Arc<MockPaymentProvider>,
    notifier: Arc<RecordingNotifier>,
) -> Arc<PaymentOrchestrator> {
    Arc::new(PaymentOrchestrator::new(store, provider, notifier, fast_guard(), 1000))
}

/// Notifier that remembers what it was told, optionally failing every call.
#[derive(Default)]
pub struct RecordingNotifier {
    pub confirmed: Mutex<Vec<Uuid>>,
    pub cancelled: Mutex<Vec<Uuid>>,
    pub completed: Mutex<Vec<Uuid>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn outcome(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.fail {
            Err("notification service unreachable".into())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn booking_confirmed(
        &self,
        booking: &Booking,
        _transaction: &Transaction,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.confirmed.lock().await.push(booking.id);
        self.outcome()
    }

    async fn booking_cancelled(
        &self,
        booking: &Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.cancelled.lock().await.push(booking.id);
        self.outcome()
    }

    async fn stay_completed(
        &self,
        booking: &Booking,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.completed.lock().await.push(booking.id);
        self.outcome()
    }
}
