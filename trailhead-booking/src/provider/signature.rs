use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use trailhead_core::BookingError;
use trailhead_shared::Masked;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]` headers.
///
/// The signed payload is `"{t}.{raw body}"` under HMAC-SHA256 with the
/// endpoint secret. Any matching `v1` entry is accepted (secret rotation
/// sends two), and `t` must fall within the tolerance window.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: Masked<String>,
    tolerance_seconds: i64,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance_seconds: i64) -> Self {
        Self {
            secret: Masked(secret.into()),
            tolerance_seconds,
        }
    }

    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<(), BookingError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| rejected("missing or malformed timestamp"))?;
        if signatures.is_empty() {
            return Err(rejected("no v1 signature"));
        }
        if now.timestamp().abs_diff(timestamp) > self.tolerance_seconds.unsigned_abs() {
            return Err(rejected("timestamp outside tolerance window"));
        }

        let matched = signatures.iter().any(|candidate| {
            let Ok(expected) = hex::decode(candidate) else {
                return false;
            };
            self.mac(payload, timestamp)
                .map_or(false, |mac| mac.verify_slice(&expected).is_ok())
        });

        if matched {
            Ok(())
        } else {
            Err(rejected("signature mismatch"))
        }
    }

    /// Header value for `payload` signed at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, BookingError> {
        let mac = self.mac(payload, timestamp)?;
        Ok(format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    fn mac(&self, payload: &[u8], timestamp: i64) -> Result<HmacSha256, BookingError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose().as_bytes())
            .map_err(|e| BookingError::WebhookSignature(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

fn rejected(reason: &str) -> BookingError {
    BookingError::WebhookSignature(reason.to_string())
}
