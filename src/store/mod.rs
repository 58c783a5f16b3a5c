//! Persistence seams for principals and the refresh token ledger.
//!
//! The auth core only talks to these traits. `PgStore` backs them with
//! Postgres, `MemoryStore` keeps the same semantics in process memory.
//!
//! Every mutation of a principal's `token_version` is a read-modify-write done
//! inside one transaction by the implementation, never a blind set from the
//! caller.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::auth::principal::{NewPrincipal, Principal, PrincipalId, PrincipalKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique constraint violation (duplicate email, device id or token).
    #[error("unique constraint violated")]
    Conflict,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persisted refresh token row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub token: String,
    pub principal_id: PrincipalId,
    pub kind: PrincipalKind,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewRefreshToken {
    pub token: String,
    pub principal_id: PrincipalId,
    pub kind: PrincipalKind,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Cheap liveness check for `/health`.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn create_principal(&self, new: &NewPrincipal) -> Result<Principal, StoreError>;

    async fn find_principal(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
    ) -> Result<Option<Principal>, StoreError>;

    /// Lookup by email (admins, users) or device id (devices).
    async fn find_by_lookup_key(
        &self,
        kind: PrincipalKind,
        lookup_key: &str,
    ) -> Result<Option<Principal>, StoreError>;

    async fn token_version(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
    ) -> Result<Option<i64>, StoreError>;

    /// Stamp a successful sign-in in one transaction and return the version to
    /// mint tokens at. Bumps the version when the kind's policy says so and
    /// marks devices active.
    async fn record_sign_in(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError>;

    /// Increment `token_version` and return the new value.
    async fn bump_token_version(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
    ) -> Result<Option<i64>, StoreError>;

    /// Replace the secret hash and increment `token_version` together.
    async fn replace_secret(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
        secret_hash: &str,
    ) -> Result<Option<i64>, StoreError>;

    async fn count_principals(&self, kind: PrincipalKind) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    async fn insert_refresh_token(
        &self,
        new: &NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError>;

    /// Single lookup applying every usability predicate: token, principal id,
    /// principal type, not revoked and `expires_at > now`.
    async fn find_usable_refresh_token(
        &self,
        token: &str,
        principal_id: PrincipalId,
        kind: PrincipalKind,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Unfiltered lookup, only used to classify a failed validation.
    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Returns whether a row changed. Unknown or already revoked tokens are not errors.
    async fn revoke_refresh_token(&self, token: &str) -> Result<bool, StoreError>;

    async fn revoke_all_refresh_tokens(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
    ) -> Result<u64, StoreError>;

    /// Delete rows with `expires_at < now` or `is_revoked`.
    async fn delete_stale_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
