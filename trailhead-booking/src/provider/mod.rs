//! Payment provider adapters.

pub mod mock;
pub mod signature;
pub mod stripe;

pub use mock::MockPaymentProvider;
pub use signature::WebhookVerifier;
pub use stripe::{parse_webhook, StripeProvider};
