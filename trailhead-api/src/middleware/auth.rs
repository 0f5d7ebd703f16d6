use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use trailhead_core::identity::{IdentityResolver, Principal};
use trailhead_core::BookingError;
use trailhead_shared::Masked;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IdentityClaims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    /// Issued as a bool, a number or a string depending on the issuer.
    #[serde(default, deserialize_with = "owner_flag")]
    pub is_owner: bool,
    pub exp: usize,
}

fn owner_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(false),
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::Number(n) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" | "" => Ok(false),
            other => Err(D::Error::custom(format!("invalid is_owner flag: {}", other))),
        },
        other => Err(D::Error::custom(format!("invalid is_owner flag: {}", other))),
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Verifies HS256 tokens minted by the identity provider.
pub struct JwtIdentityResolver {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    pub fn new(secret: &str, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, bearer_token: &str) -> Result<Principal, BookingError> {
        let token_data = decode::<IdentityClaims>(bearer_token, &self.key, &self.validation)
            .map_err(|e| BookingError::Unauthenticated(format!("invalid token: {}", e)))?;

        let claims = token_data.claims;
        Ok(Principal {
            user_id: claims.sub,
            email: claims.email.map(Masked),
            is_owner: claims.is_owner,
        })
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Resolves the bearer token into a `Principal` request extension; 401 otherwise.
pub async fn require_principal(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Authorization(bearer) = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or_else(|| BookingError::Unauthenticated("missing bearer token".to_string()))?;

    let principal = state.identity.resolve(bearer.token()).await?;
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}
