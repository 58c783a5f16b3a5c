//! Token authentication and authorization core.
//!
//! ## Sessions
//!
//! A sign-in issues a short-lived access token (stateless, HS256) and a
//! long-lived refresh token (signed and recorded in the ledger). Access tokens
//! carry the principal's `token_version`; bumping that counter is the only way
//! to revoke them before expiry, which is why the gate reads it on every
//! authenticated request.
//!
//! ## Logout
//!
//! With the default `version-bump` policy logout kills outstanding access
//! tokens but leaves refresh tokens usable: a refresh after logout mints a
//! token at the new version. `revoke-refresh` also revokes every refresh token
//! of the principal. The admin revoke endpoint always does both.
//!
//! ## Rate Limiting
//!
//! Configured routes are limited per client address with a token bucket of
//! `requests_per_minute` tokens. Idle buckets are evicted by a background
//! sweep.

pub mod authenticator;
pub mod config;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod principal;
pub mod rate_limit;
pub mod secret;
pub mod state;
pub mod token;
mod utils;

pub use authenticator::{AccessGrant, Authenticator, DeviceCredentials, PrincipalCounts, Session};
pub use config::{AuthConfig, LogoutPolicy, RateLimitConfig};
pub use error::AuthError;
pub use principal::{AuthContext, Principal, PrincipalId, PrincipalKind};
pub use rate_limit::{NoopRateLimiter, RateLimiter, TokenBucketLimiter};
pub use state::AuthState;
pub use token::TokenCodec;
