use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use trailhead_core::payment::{CheckoutRequest, PaymentProvider, ProviderSession};
use trailhead_core::{BookingError, PaymentProviderError, PaymentStatus};
use trailhead_shared::Masked;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct CheckoutSessionObject {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_status: Option<String>,
    payment_intent: Option<String>,
    amount_total: Option<i64>,
    currency: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl CheckoutSessionObject {
    fn status(&self) -> PaymentStatus {
        match (self.status.as_deref(), self.payment_status.as_deref()) {
            (Some("expired"), _) => PaymentStatus::Expired,
            (_, Some("paid")) | (_, Some("no_payment_required")) => PaymentStatus::Paid,
            _ => PaymentStatus::Pending,
        }
    }

    fn into_provider_session(self, status: PaymentStatus) -> ProviderSession {
        // Sessions that settle without a PaymentIntent fall back to their own id.
        let payment_reference = match (status, self.payment_intent) {
            (PaymentStatus::Paid, None) => Some(self.id.clone()),
            (_, reference) => reference,
        };

        ProviderSession {
            id: self.id,
            url: self.url,
            status,
            payment_reference,
            amount_total: self.amount_total,
            currency: self.currency,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefundObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

/// Turn a verified webhook body into the provider's view of the session.
/// Event types that carry no checkout outcome yield `None`.
pub fn parse_webhook(payload: &[u8]) -> Result<Option<ProviderSession>, BookingError> {
    let event: StripeEvent = serde_json::from_slice(payload)
        .map_err(|e| BookingError::Validation(format!("malformed webhook payload: {}", e)))?;

    let forced_status = match event.type_.as_str() {
        "checkout.session.completed" => None,
        "checkout.session.async_payment_succeeded" => Some(PaymentStatus::Paid),
        "checkout.session.async_payment_failed" => Some(PaymentStatus::Failed),
        "checkout.session.expired" => Some(PaymentStatus::Expired),
        other => {
            debug!(event_id = %event.id, event_type = other, "ignoring webhook event");
            return Ok(None);
        }
    };

    let session: CheckoutSessionObject = serde_json::from_value(event.data.object)
        .map_err(|e| BookingError::Validation(format!("malformed checkout session in {}: {}", event.id, e)))?;
    let status = forced_status.unwrap_or_else(|| session.status());

    Ok(Some(session.into_provider_session(status)))
}

// ============================================================================
// Client
// ============================================================================

/// Stripe accepts `expires_at` between 30 minutes and 24 hours after creation.
const MIN_SESSION_LIFETIME_SECS: i64 = 31 * 60;
const MAX_SESSION_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Stripe Checkout adapter over the REST API.
pub struct StripeProvider {
    client: reqwest::Client,
    api_key: Masked<String>,
    base_url: String,
    success_url: String,
    cancel_url: String,
}

impl StripeProvider {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PaymentProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentProviderError::Unavailable(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: Masked(api_key.into()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn checkout_form(&self, request: &CheckoutRequest, now: DateTime<Utc>) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            ("client_reference_id".to_string(), request.booking_id.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("line_items[0][price_data][currency]".to_string(), request.currency.clone()),
            ("line_items[0][price_data][unit_amount]".to_string(), request.amount_total.to_string()),
            ("line_items[0][price_data][product_data][name]".to_string(), request.description.clone()),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
            form.push((format!("payment_intent_data[metadata][{}]", key), value.clone()));
        }
        if let Some(expires_at) = request.expires_at {
            let expires_at = expires_at.clamp(
                now + chrono::Duration::seconds(MIN_SESSION_LIFETIME_SECS),
                now + chrono::Duration::seconds(MAX_SESSION_LIFETIME_SECS),
            );
            form.push(("expires_at".to_string(), expires_at.timestamp().to_string()));
        }
        form
    }
}

fn transport_error(err: reqwest::Error) -> PaymentProviderError {
    PaymentProviderError::Unavailable(format!("request to payment provider failed: {}", err))
}

fn map_error(status: StatusCode, body: &str) -> PaymentProviderError {
    let detail = serde_json::from_str::<StripeErrorEnvelope>(body).ok().map(|e| e.error);
    let kind = detail.as_ref().and_then(|d| d.type_.clone());
    let message = detail
        .and_then(|d| match (d.message, d.code) {
            (Some(message), _) => Some(message),
            (None, code) => code,
        })
        .unwrap_or_else(|| format!("provider returned {}", status));

    match (status.as_u16(), kind.as_deref()) {
        (_, Some("card_error")) | (402, _) => PaymentProviderError::CardDeclined(message),
        (401, _) | (403, _) => PaymentProviderError::Authentication(message),
        (429, _) => PaymentProviderError::RateLimited(message),
        (s, _) if s >= 500 => PaymentProviderError::Unavailable(message),
        (_, Some("api_error")) => PaymentProviderError::Unavailable(message),
        _ => PaymentProviderError::InvalidRequest(message),
    }
}

async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, PaymentProviderError> {
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(|e| {
            PaymentProviderError::Unavailable(format!("unreadable provider response: {}", e))
        });
    }

    let body = response.text().await.unwrap_or_default();
    Err(map_error(status, &body))
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    async fn create_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<ProviderSession, PaymentProviderError> {
        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(self.api_key.expose())
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&self.checkout_form(request, Utc::now()))
            .send()
            .await
            .map_err(transport_error)?;

        let session: CheckoutSessionObject = read(response).await?;
        let status = session.status();
        Ok(session.into_provider_session(status))
    }

    async fn retrieve_session(
        &self,
        session_id: &str,
    ) -> Result<ProviderSession, PaymentProviderError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/checkout/sessions/{}", session_id)))
            .bearer_auth(self.api_key.expose())
            .send()
            .await
            .map_err(transport_error)?;

        let session: CheckoutSessionObject = read(response).await?;
        let status = session.status();
        Ok(session.into_provider_session(status))
    }

    async fn expire_session(&self, session_id: &str) -> Result<(), PaymentProviderError> {
        let response = self
            .client
            .post(self.url(&format!("/v1/checkout/sessions/{}/expire", session_id)))
            .bearer_auth(self.api_key.expose())
            .send()
            .await
            .map_err(transport_error)?;

        match read::<CheckoutSessionObject>(response).await {
            Ok(_) => Ok(()),
            // Only open sessions can be expired; one that already expired is fine
            Err(PaymentProviderError::InvalidRequest(message)) => {
                match self.retrieve_session(session_id).await?.status {
                    PaymentStatus::Expired => Ok(()),
                    _ => Err(PaymentProviderError::InvalidRequest(message)),
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn refund(
        &self,
        payment_reference: &str,
        amount: i64,
        idempotency_key: &str,
    ) -> Result<String, PaymentProviderError> {
        let form = [
            ("payment_intent", payment_reference.to_string()),
            ("amount", amount.to_string()),
        ];
        let response = self
            .client
            .post(self.url("/v1/refunds"))
            .bearer_auth(self.api_key.expose())
            .header("Idempotency-Key", idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        let refund: RefundObject = read(response).await?;
        Ok(refund.id)
    }
}
