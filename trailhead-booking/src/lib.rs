pub mod availability;
pub mod holds;
pub mod bookings;
pub mod orchestrator;
pub mod sweeper;
pub mod resilience;
pub mod provider;

#[cfg(test)]
pub(crate) mod testing;

pub use availability::AvailabilityLedger;
pub use holds::HoldManager;
pub use bookings::BookingService;
pub use orchestrator::{PaymentOrchestrator, ReconciliationResult, SessionHandle};
pub use sweeper::{CompletionSweeper, SweepReport};
pub use resilience::{CircuitBreaker, CircuitState, ProviderGuard, RetryPolicy};
pub use provider::{MockPaymentProvider, StripeProvider, WebhookVerifier};
