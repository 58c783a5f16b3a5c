//! Auth and rate limit configuration.

use chrono::TimeDelta;
use std::{str::FromStr, time::Duration};

pub const DEFAULT_ACCESS_TOKEN_TTL_MINUTES: i64 = 24 * 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 365;
pub const DEFAULT_REFRESH_SWEEP_INTERVAL_SECONDS: u64 = 60 * 60;

pub const DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE: u32 = 60;
pub const DEFAULT_RATE_LIMIT_PATHS: &str = "/api/v1/auth/login";
pub const DEFAULT_RATE_LIMIT_SWEEP_INTERVAL_SECONDS: u64 = 5 * 60;
pub const DEFAULT_RATE_LIMIT_IDLE_SECONDS: u64 = 20 * 60;

/// What logout and secret resets do to outstanding refresh tokens.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogoutPolicy {
    /// Bump the token version only. Refresh tokens stay usable and mint access
    /// tokens at the new version.
    #[default]
    VersionBump,
    /// Bump the version and revoke every refresh token of the principal.
    RevokeRefresh,
}

impl LogoutPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VersionBump => "version-bump",
            Self::RevokeRefresh => "revoke-refresh",
        }
    }

    #[must_use]
    pub const fn revokes_refresh_tokens(self) -> bool {
        matches!(self, Self::RevokeRefresh)
    }
}

impl FromStr for LogoutPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "version-bump" => Ok(Self::VersionBump),
            "revoke-refresh" => Ok(Self::RevokeRefresh),
            other => Err(format!(
                "invalid logout policy '{other}', expected version-bump or revoke-refresh"
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    access_token_ttl_minutes: i64,
    refresh_token_ttl_days: i64,
    refresh_sweep_interval_seconds: u64,
    logout_policy: LogoutPolicy,
    seed_admin_email: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            access_token_ttl_minutes: DEFAULT_ACCESS_TOKEN_TTL_MINUTES,
            refresh_token_ttl_days: DEFAULT_REFRESH_TOKEN_TTL_DAYS,
            refresh_sweep_interval_seconds: DEFAULT_REFRESH_SWEEP_INTERVAL_SECONDS,
            logout_policy: LogoutPolicy::VersionBump,
            seed_admin_email: None,
        }
    }

    #[must_use]
    pub const fn with_access_token_ttl_minutes(mut self, minutes: i64) -> Self {
        self.access_token_ttl_minutes = minutes;
        self
    }

    #[must_use]
    pub const fn with_refresh_token_ttl_days(mut self, days: i64) -> Self {
        self.refresh_token_ttl_days = days;
        self
    }

    #[must_use]
    pub const fn with_refresh_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.refresh_sweep_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_logout_policy(mut self, policy: LogoutPolicy) -> Self {
        self.logout_policy = policy;
        self
    }

    #[must_use]
    pub fn with_seed_admin_email(mut self, email: Option<String>) -> Self {
        self.seed_admin_email = email;
        self
    }

    /// `None` when the configured minutes do not fit a `TimeDelta`.
    #[must_use]
    pub fn access_token_ttl(&self) -> Option<TimeDelta> {
        TimeDelta::try_minutes(self.access_token_ttl_minutes)
    }

    /// `None` when the configured days do not fit a `TimeDelta`.
    #[must_use]
    pub fn refresh_token_ttl(&self) -> Option<TimeDelta> {
        TimeDelta::try_days(self.refresh_token_ttl_days)
    }

    #[must_use]
    pub const fn refresh_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_sweep_interval_seconds)
    }

    #[must_use]
    pub const fn logout_policy(&self) -> LogoutPolicy {
        self.logout_policy
    }

    #[must_use]
    pub fn seed_admin_email(&self) -> Option<&str> {
        self.seed_admin_email.as_deref()
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    requests_per_minute: u32,
    limited_paths: Vec<String>,
    sweep_interval_seconds: u64,
    idle_seconds: u64,
    trust_proxy_headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            requests_per_minute: DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE,
            limited_paths: parse_paths(DEFAULT_RATE_LIMIT_PATHS),
            sweep_interval_seconds: DEFAULT_RATE_LIMIT_SWEEP_INTERVAL_SECONDS,
            idle_seconds: DEFAULT_RATE_LIMIT_IDLE_SECONDS,
            trust_proxy_headers: false,
        }
    }

    #[must_use]
    pub const fn with_requests_per_minute(mut self, requests: u32) -> Self {
        self.requests_per_minute = requests;
        self
    }

    #[must_use]
    pub fn with_limited_paths(mut self, paths: Vec<String>) -> Self {
        self.limited_paths = paths;
        self
    }

    #[must_use]
    pub const fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.sweep_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_idle_seconds(mut self, seconds: u64) -> Self {
        self.idle_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_trust_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }

    #[must_use]
    pub const fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    #[must_use]
    pub fn limited_paths(&self) -> &[String] {
        &self.limited_paths
    }

    #[must_use]
    pub fn is_limited(&self, route: &str) -> bool {
        self.limited_paths.iter().any(|path| path == route)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    #[must_use]
    pub const fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_seconds)
    }

    #[must_use]
    pub const fn trust_proxy_headers(&self) -> bool {
        self.trust_proxy_headers
    }
}

/// Split a comma separated path list, dropping blanks.
#[must_use]
pub fn parse_paths(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_defaults() {
        let config = AuthConfig::new();
        assert_eq!(config.access_token_ttl(), TimeDelta::try_minutes(1440));
        assert_eq!(config.refresh_token_ttl(), TimeDelta::try_days(365));
        assert_eq!(config.logout_policy(), LogoutPolicy::VersionBump);
        assert_eq!(config.refresh_sweep_interval(), Duration::from_secs(3600));
        assert!(config.seed_admin_email().is_none());
    }

    #[test]
    fn auth_config_overrides() {
        let config = AuthConfig::new()
            .with_access_token_ttl_minutes(15)
            .with_refresh_token_ttl_days(30)
            .with_logout_policy(LogoutPolicy::RevokeRefresh)
            .with_seed_admin_email(Some("admin@example.com".to_string()));
        assert_eq!(config.access_token_ttl(), TimeDelta::try_minutes(15));
        assert_eq!(config.refresh_token_ttl(), TimeDelta::try_days(30));
        assert!(config.logout_policy().revokes_refresh_tokens());
        assert_eq!(config.seed_admin_email(), Some("admin@example.com"));
    }

    #[test]
    fn oversized_ttls_are_unrepresentable() {
        let config = AuthConfig::new()
            .with_access_token_ttl_minutes(i64::MAX)
            .with_refresh_token_ttl_days(i64::MAX);
        assert_eq!(config.access_token_ttl(), None);
        assert_eq!(config.refresh_token_ttl(), None);
    }

    #[test]
    fn rate_limit_defaults_cover_login_only() {
        let config = RateLimitConfig::new();
        assert_eq!(config.requests_per_minute(), 60);
        assert!(config.is_limited("/api/v1/auth/login"));
        assert!(!config.is_limited("/api/v1/auth/refresh"));
        assert_eq!(config.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.idle_threshold(), Duration::from_secs(1200));
        assert!(!config.trust_proxy_headers());
    }

    #[test]
    fn paths_are_trimmed() {
        assert_eq!(
            parse_paths(" /a , ,/b/{id},"),
            vec!["/a".to_string(), "/b/{id}".to_string()]
        );
    }

    #[test]
    fn logout_policy_parse() {
        assert_eq!(
            "revoke-refresh".parse::<LogoutPolicy>(),
            Ok(LogoutPolicy::RevokeRefresh)
        );
        assert_eq!(
            " Version-Bump ".parse::<LogoutPolicy>(),
            Ok(LogoutPolicy::VersionBump)
        );
        assert!("full".parse::<LogoutPolicy>().is_err());
    }
}
