use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use trailhead_core::{BookingError, PaymentProviderError};

#[derive(Debug)]
pub enum AppError {
    RateLimited,
    Anyhow(anyhow::Error),
}

/// HTTP status and stable machine-readable code for a domain error.
pub fn classify(err: &BookingError) -> (StatusCode, &'static str) {
    match err {
        BookingError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        BookingError::DateRangeConflict { .. } => (StatusCode::CONFLICT, "DATE_RANGE_CONFLICT"),
        BookingError::IllegalTransition(_) => (StatusCode::CONFLICT, "ILLEGAL_TRANSITION"),
        BookingError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        BookingError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        BookingError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
        BookingError::WebhookSignature(_) => (StatusCode::BAD_REQUEST, "WEBHOOK_SIGNATURE_INVALID"),
        BookingError::Payment(p) => match p {
            PaymentProviderError::CardDeclined(_) => (StatusCode::PAYMENT_REQUIRED, "CARD_DECLINED"),
            PaymentProviderError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "PAYMENT_INVALID_REQUEST"),
            PaymentProviderError::Unavailable(_) | PaymentProviderError::CircuitOpen => {
                (StatusCode::SERVICE_UNAVAILABLE, "PAYMENT_PROVIDER_UNAVAILABLE")
            }
            PaymentProviderError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "PAYMENT_RATE_LIMITED"),
            PaymentProviderError::Authentication(_) => (StatusCode::UNAUTHORIZED, "PAYMENT_AUTH_FAILURE"),
        },
        BookingError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Rate limit exceeded".to_string(),
            ),
            AppError::Anyhow(err) => match err.downcast::<BookingError>() {
                Ok(err) => {
                    let (status, code) = classify(&err);
                    if status.is_server_error() {
                        tracing::error!(code, "Internal Server Error: {}", err);
                        (status, code, "Internal Server Error".to_string())
                    } else {
                        (status, code, err.to_string())
                    }
                }
                Err(err) => {
                    tracing::error!("Internal Server Error: {:#}", err);
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "Internal Server Error".to_string(),
                    )
                }
            },
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}
