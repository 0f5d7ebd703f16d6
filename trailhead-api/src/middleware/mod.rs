pub mod auth;
pub mod rate_limit;

pub use auth::{require_principal, IdentityClaims, JwtIdentityResolver};
pub use rate_limit::{rate_limit_middleware, InMemoryRateLimiter, RateLimiter};
