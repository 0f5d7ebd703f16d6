use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use trailhead_core::PaymentProviderError;

// ============================================================================
// Retry policy
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on a single provider call.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): exponential growth capped
    /// at `max_delay`, with equal jitter so the delay lies in `[cap/2, cap]`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)));
        let cap = exp.min(self.max_delay).as_millis() as u64;
        let half = cap / 2;
        let jitter = if half == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=half)
        };
        Duration::from_millis(cap - half + jitter)
    }
}

// ============================================================================
// Circuit breaker
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing fast until the cooldown elapses
    HalfOpen, // Letting a probe through
}

pub struct CircuitBreaker {
    pub name: String,
    state: RwLock<CircuitState>,
    failure_count: AtomicUsize,
    failure_threshold: usize,
    cooldown: Duration,
    opened_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold,
            cooldown,
            opened_at: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether a call may proceed right now.
    pub async fn check(&self) -> bool {
        let state = *self.state.read().await;
        if state != CircuitState::Open {
            return true;
        }

        let opened_at = *self.opened_at.read().await;
        match opened_at {
            Some(instant) if instant.elapsed() >= self.cooldown => {
                let mut s = self.state.write().await;
                *s = CircuitState::HalfOpen;
                tracing::info!("Circuit Breaker [{}] moving to Half-Open", self.name);
                true
            }
            _ => false,
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            tracing::info!("Circuit Breaker [{}] recovered to Closed", self.name);
        }
        *state = CircuitState::Closed;
        self.failure_count.store(0, Ordering::SeqCst);
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            *self.opened_at.write().await = Some(Instant::now());
            tracing::error!("Circuit Breaker [{}] TRIPPED to Open. Failures: {}", self.name, count);
        }
    }
}

// ============================================================================
// Guarded provider calls
// ============================================================================

/// Wraps every outbound provider call with a per-attempt timeout, bounded
/// retries for transient failures and the circuit breaker.
pub struct ProviderGuard {
    policy: RetryPolicy,
    breaker: CircuitBreaker,
}

impl ProviderGuard {
    pub fn new(policy: RetryPolicy, breaker: CircuitBreaker) -> Self {
        Self { policy, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn call<T, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, PaymentProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PaymentProviderError>>,
    {
        let mut attempt = 0;
        loop {
            if !self.breaker.check().await {
                tracing::warn!(operation, breaker = %self.breaker.name, "provider call rejected, circuit open");
                return Err(PaymentProviderError::CircuitOpen);
            }
            attempt += 1;

            let result = match tokio::time::timeout(self.policy.attempt_timeout, f()).await {
                Ok(result) => result,
                Err(_) => Err(PaymentProviderError::Unavailable(format!(
                    "{} timed out after {:?}",
                    operation, self.policy.attempt_timeout
                ))),
            };

            match result {
                Ok(value) => {
                    self.breaker.record_success().await;
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    self.breaker.record_failure().await;
                    if attempt >= self.policy.max_attempts {
                        tracing::error!(operation, attempt, error = %err, "provider call failed, giving up");
                        return Err(err);
                    }
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(operation, attempt, ?delay, error = %err, "transient provider failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    // The provider answered; a decline says nothing about its health.
                    self.breaker.record_success().await;
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_backoff_is_capped_and_grows() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            attempt_timeout: Duration::from_secs(1),
        };

        for _ in 0..50 {
            let first = policy.backoff(1);
            assert!(first >= Duration::from_millis(50) && first <= Duration::from_millis(100));

            let third = policy.backoff(3);
            assert!(third >= Duration::from_millis(200) && third <= Duration::from_millis(400));

            assert!(policy.backoff(20) <= Duration::from_millis(1000));
        }
    }

    #[tokio::test]
    async fn test_breaker_trips_and_recovers() {
        let breaker = CircuitBreaker::new("stripe", 2, Duration::from_millis(20));
        assert!(breaker.check().await);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.check().await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(breaker.check().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("stripe", 1, Duration::from_millis(10));
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.check().await);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let guard = ProviderGuard::new(fast_policy(3), CircuitBreaker::new("stripe", 10, Duration::from_secs(30)));
        let calls = Arc::new(AtomicU32::new(0));

        let result = guard
            .call("create_session", || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(PaymentProviderError::Unavailable("503".into()))
                    } else {
                        Ok("cs_123")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "cs_123");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(guard.breaker().state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_decline_is_not_retried() {
        let guard = ProviderGuard::new(fast_policy(3), CircuitBreaker::new("stripe", 10, Duration::from_secs(30)));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), _> = guard
            .call("create_session", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(PaymentProviderError::CardDeclined("insufficient_funds".into()))
                }
            })
            .await;

        assert!(matches!(result, Err(PaymentProviderError::CardDeclined(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast() {
        let guard = ProviderGuard::new(fast_policy(2), CircuitBreaker::new("stripe", 2, Duration::from_secs(30)));

        let first: Result<(), _> = guard
            .call("refund", || async { Err(PaymentProviderError::Unavailable("down".into())) })
            .await;
        assert!(matches!(first, Err(PaymentProviderError::Unavailable(_))));

        let calls = Arc::new(AtomicU32::new(0));
        let second: Result<(), _> = guard
            .call("refund", || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        assert_eq!(second, Err(PaymentProviderError::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_call_times_out() {
        let guard = ProviderGuard::new(fast_policy(1), CircuitBreaker::new("stripe", 10, Duration::from_secs(30)));

        let result: Result<(), _> = guard
            .call("retrieve_session", || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(PaymentProviderError::Unavailable(msg)) if msg.contains("timed out")));
    }
}
