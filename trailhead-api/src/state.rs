use std::sync::Arc;
use std::time::Duration;
use trailhead_booking::{
    AvailabilityLedger, BookingService, CircuitBreaker, CompletionSweeper, HoldManager,
    PaymentOrchestrator, ProviderGuard, RetryPolicy, WebhookVerifier,
};
use trailhead_core::identity::IdentityResolver;
use trailhead_core::notify::Notifier;
use trailhead_core::payment::PaymentProvider;
use trailhead_core::BookingStore;
use trailhead_store::app_config::{Config, RateLimitConfig, ResilienceConfig};

use crate::metrics::Metrics;
use crate::middleware::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<AvailabilityLedger>,
    pub holds: Arc<HoldManager>,
    pub bookings: Arc<BookingService>,
    pub payments: Arc<PaymentOrchestrator>,
    pub sweeper: Arc<CompletionSweeper>,
    pub webhooks: Arc<WebhookVerifier>,
    pub identity: Arc<dyn IdentityResolver>,
    pub rate_limiter: Option<Arc<dyn RateLimiter>>,
    pub rate_limit: RateLimitConfig,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Wire the booking services over the given collaborators.
    pub fn new(
        config: &Config,
        store: Arc<dyn BookingStore>,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn Notifier>,
        identity: Arc<dyn IdentityResolver>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let guard = provider_guard(&config.resilience, config.stripe.timeout_ms);
        let payments = Arc::new(PaymentOrchestrator::new(
            store.clone(),
            provider,
            notifier.clone(),
            guard,
            config.business_rules.service_fee_bps,
        ));

        Self {
            ledger: Arc::new(AvailabilityLedger::new(store.clone())),
            holds: Arc::new(HoldManager::new(store.clone(), config.business_rules.hold_minutes)),
            bookings: Arc::new(BookingService::new(store.clone(), payments.clone(), notifier.clone())),
            sweeper: Arc::new(CompletionSweeper::new(store, payments.clone(), notifier)),
            payments,
            webhooks: Arc::new(WebhookVerifier::new(
                config.stripe.webhook_secret.clone(),
                config.stripe.webhook_tolerance_seconds,
            )),
            identity,
            rate_limiter: None,
            rate_limit: config.rate_limit.clone(),
            metrics,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }
}

fn provider_guard(resilience: &ResilienceConfig, timeout_ms: u64) -> ProviderGuard {
    ProviderGuard::new(
        RetryPolicy {
            max_attempts: resilience.max_attempts,
            base_delay: Duration::from_millis(resilience.base_delay_ms),
            max_delay: Duration::from_millis(resilience.max_delay_ms),
            attempt_timeout: Duration::from_millis(timeout_ms),
        },
        CircuitBreaker::new(
            "payment-provider",
            resilience.failure_threshold,
            Duration::from_secs(resilience.cooldown_seconds),
        ),
    )
}
