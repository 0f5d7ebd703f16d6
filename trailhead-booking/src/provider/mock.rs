use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use trailhead_core::payment::{CheckoutRequest, PaymentProvider, ProviderSession};
use trailhead_core::{PaymentProviderError, PaymentStatus};

#[derive(Default)]
struct MockState {
    sessions: HashMap<String, ProviderSession>,
    by_idempotency_key: HashMap<String, String>,
    requests: Vec<CheckoutRequest>,
    refunds: Vec<(String, i64)>,
    create_failures: VecDeque<PaymentProviderError>,
    refund_failures: VecDeque<PaymentProviderError>,
}

/// Scriptable in-process provider for local runs and tests.
///
/// Sessions start Pending; tests drive them to an outcome with
/// `complete_session` or `fail_session`. Only Pending sessions can settle.
#[derive(Default)]
pub struct MockPaymentProvider {
    state: Mutex<MockState>,
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `create_session` call with `err`.
    pub async fn fail_next_create(&self, err: PaymentProviderError) {
        self.state.lock().await.create_failures.push_back(err);
    }

    pub async fn fail_next_refund(&self, err: PaymentProviderError) {
        self.state.lock().await.refund_failures.push_back(err);
    }

    /// Mark a session paid under `payment_reference`; returns the provider view.
    pub async fn complete_session(&self, session_id: &str, payment_reference: &str) -> Option<ProviderSession> {
        self.settle(session_id, PaymentStatus::Paid, Some(payment_reference)).await
    }

    pub async fn fail_session(&self, session_id: &str) -> Option<ProviderSession> {
        self.settle(session_id, PaymentStatus::Failed, None).await
    }

    pub async fn requests(&self) -> Vec<CheckoutRequest> {
        self.state.lock().await.requests.clone()
    }

    /// `(payment_reference, amount)` of every refund issued.
    pub async fn refunds(&self) -> Vec<(String, i64)> {
        self.state.lock().await.refunds.clone()
    }

    async fn settle(
        &self,
        session_id: &str,
        status: PaymentStatus,
        payment_reference: Option<&str>,
    ) -> Option<ProviderSession> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .filter(|s| s.status == PaymentStatus::Pending)?;
        session.status = status;
        session.payment_reference = payment_reference.map(str::to_string);
        Some(session.clone())
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<ProviderSession, PaymentProviderError> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }

        if let Some(existing) = state
            .by_idempotency_key
            .get(&request.idempotency_key)
            .and_then(|id| state.sessions.get(id))
        {
            return Ok(existing.clone());
        }

        let id = format!("cs_mock_{}", state.sessions.len() + 1);
        let session = ProviderSession {
            id: id.clone(),
            url: Some(format!("https://checkout.mock.test/pay/{}", id)),
            status: PaymentStatus::Pending,
            payment_reference: None,
            amount_total: Some(request.amount_total),
            currency: Some(request.currency.clone()),
            metadata: request.metadata.clone(),
        };

        state.requests.push(request.clone());
        state
            .by_idempotency_key
            .insert(request.idempotency_key.clone(), id.clone());
        state.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Result<ProviderSession, PaymentProviderError> {
        self.state
            .lock()
            .await
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| PaymentProviderError::InvalidRequest(format!("No such checkout session: {}", session_id)))
    }

    async fn expire_session(&self, session_id: &str) -> Result<(), PaymentProviderError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| PaymentProviderError::InvalidRequest(format!("No such checkout session: {}", session_id)))?;

        match session.status {
            PaymentStatus::Pending => {
                session.status = PaymentStatus::Expired;
                Ok(())
            }
            PaymentStatus::Expired => Ok(()),
            other => Err(PaymentProviderError::InvalidRequest(format!(
                "checkout session {} is {} and cannot be expired",
                session_id,
                other.as_str()
            ))),
        }
    }

    async fn refund(
        &self,
        payment_reference: &str,
        amount: i64,
        _idempotency_key: &str,
    ) -> Result<String, PaymentProviderError> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.refund_failures.pop_front() {
            return Err(err);
        }

        state.refunds.push((payment_reference.to_string(), amount));
        Ok(format!("re_mock_{}", state.refunds.len()))
    }
}
