//! Shared auth state handed to every handler and middleware.

use super::{
    authenticator::Authenticator,
    config::{AuthConfig, RateLimitConfig},
    ledger::RefreshLedger,
    rate_limit::{NoopRateLimiter, RateLimiter, TokenBucketLimiter},
    secret,
    token::{CodecError, RECOMMENDED_SECRET_BYTES, TokenCodec},
};
use crate::store::{CredentialStore, RefreshTokenStore};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::warn;

pub struct AuthState {
    config: AuthConfig,
    rate_limit: RateLimitConfig,
    authenticator: Authenticator,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        rate_limit: RateLimitConfig,
        authenticator: Authenticator,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> Self {
        Self {
            config,
            rate_limit,
            authenticator,
            rate_limiter,
        }
    }

    /// Wire codec, ledger, authenticator and limiter from configuration.
    ///
    /// # Errors
    /// Returns an error when the signing secret is empty or a TTL is not
    /// positive or too large to compute an expiry from.
    pub fn build(
        config: AuthConfig,
        rate_limit: RateLimitConfig,
        jwt_secret: SecretString,
        credentials: Arc<dyn CredentialStore>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
    ) -> Result<Self, CodecError> {
        let access_ttl = config.access_token_ttl().ok_or(CodecError::InvalidTtl)?;
        let refresh_ttl = config.refresh_token_ttl().ok_or(CodecError::InvalidTtl)?;
        let codec = Arc::new(TokenCodec::new(jwt_secret, access_ttl, refresh_ttl)?);
        if codec.secret_is_short() {
            warn!(
                "Token signing secret is shorter than {RECOMMENDED_SECRET_BYTES} bytes; use a longer random value"
            );
        }
        secret::warm_dummy_hash();
        let ledger = Arc::new(RefreshLedger::new(refresh_tokens, Arc::clone(&codec)));
        let authenticator =
            Authenticator::new(credentials, ledger, Arc::clone(&codec), config.logout_policy());

        let rate_limiter: Arc<dyn RateLimiter> = if rate_limit.requests_per_minute() == 0 {
            Arc::new(NoopRateLimiter)
        } else {
            Arc::new(TokenBucketLimiter::new(
                rate_limit.requests_per_minute(),
                rate_limit.idle_threshold(),
            ))
        };

        Ok(Self::new(config, rate_limit, authenticator, rate_limiter))
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn rate_limit_config(&self) -> &RateLimitConfig {
        &self.rate_limit
    }

    #[must_use]
    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    /// Owned handle for the background sweeper.
    #[must_use]
    pub fn rate_limiter_handle(&self) -> Arc<dyn RateLimiter> {
        Arc::clone(&self.rate_limiter)
    }
}
