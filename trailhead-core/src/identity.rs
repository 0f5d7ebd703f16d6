use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trailhead_shared::Masked;
use uuid::Uuid;

use crate::error::BookingError;

/// The caller, as resolved by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: Option<Masked<String>>,
    pub is_owner: bool,
}

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Turn a bearer token into a principal, or `BookingError::Unauthenticated`.
    async fn resolve(&self, bearer_token: &str) -> Result<Principal, BookingError>;
}
