//! Refresh token ledger.
//!
//! Every refresh token the service hands out is also a row here. A refresh
//! token is usable only while its row exists, is not revoked, has not expired
//! and names the same principal as the signed claims. All four predicates are
//! evaluated by the store in one query.

use super::{
    error::AuthError,
    principal::{PrincipalId, PrincipalKind},
    token::TokenCodec,
};
use crate::store::{NewRefreshToken, RefreshTokenRecord, RefreshTokenStore};
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

/// Why a refresh token failed the usable-row query. Logged, never rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Rejection {
    NotFound,
    Revoked,
    Expired,
    TypeMismatch,
}

impl From<Rejection> for AuthError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::NotFound => Self::RefreshTokenNotFound,
            Rejection::Revoked => Self::RefreshTokenRevoked,
            Rejection::Expired => Self::RefreshTokenExpired,
            Rejection::TypeMismatch => Self::RefreshTokenTypeMismatch,
        }
    }
}

pub struct RefreshLedger {
    store: Arc<dyn RefreshTokenStore>,
    codec: Arc<TokenCodec>,
}

impl RefreshLedger {
    #[must_use]
    pub fn new(store: Arc<dyn RefreshTokenStore>, codec: Arc<TokenCodec>) -> Self {
        Self { store, codec }
    }

    /// Mint a refresh token and persist its row.
    ///
    /// # Errors
    /// Returns `Internal` if signing or the insert fails.
    pub async fn issue(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
    ) -> Result<RefreshTokenRecord, AuthError> {
        self.issue_at(principal_id, kind, Utc::now()).await
    }

    /// # Errors
    /// Returns `Internal` if signing or the insert fails.
    #[instrument(skip(self), fields(principal_id = %principal_id, principal_type = %kind))]
    pub async fn issue_at(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
        now: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, AuthError> {
        let issued = self.codec.issue_refresh_at(principal_id, kind, now)?;
        let record = self
            .store
            .insert_refresh_token(&NewRefreshToken {
                token: issued.token,
                principal_id,
                kind,
                expires_at: issued.expires_at,
            })
            .await
            .map_err(|err| match AuthError::from(err) {
                // A duplicate token string is an issuance bug, not a client error.
                AuthError::Conflict => {
                    AuthError::Internal(anyhow::anyhow!("refresh token collided on insert"))
                }
                other => other,
            })?;
        debug!(refresh_token_id = record.id, "refresh token issued");
        Ok(record)
    }

    /// # Errors
    /// Returns one of the refresh token errors when the token is not usable.
    pub async fn validate(&self, token: &str) -> Result<RefreshTokenRecord, AuthError> {
        self.validate_at(token, Utc::now()).await
    }

    /// Decode the token, then look up a usable row. A miss is classified with a
    /// second read for the logs; the caller only ever sees a refresh error.
    ///
    /// # Errors
    /// Returns one of the refresh token errors when the token is not usable.
    pub async fn validate_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, AuthError> {
        let claims = self
            .codec
            .verify_refresh_at(token, now.timestamp())
            .map_err(|err| {
                debug!("refresh token rejected by codec: {err}");
                match err {
                    AuthError::Internal(err) => AuthError::Internal(err),
                    AuthError::TokenExpired => Rejection::Expired.into(),
                    AuthError::TokenWrongKind | AuthError::UnknownPrincipalType => {
                        Rejection::TypeMismatch.into()
                    }
                    _ => Rejection::NotFound.into(),
                }
            })?;

        if let Some(record) = self
            .store
            .find_usable_refresh_token(token, claims.principal_id, claims.kind, now)
            .await?
        {
            return Ok(record);
        }

        let rejection = match self.store.find_refresh_token(token).await? {
            None => Rejection::NotFound,
            Some(row) if row.principal_id != claims.principal_id || row.kind != claims.kind => {
                Rejection::TypeMismatch
            }
            Some(row) if row.is_revoked => Rejection::Revoked,
            Some(row) if row.expires_at <= now => Rejection::Expired,
            // Became usable between the two reads; still refuse this attempt.
            Some(_) => Rejection::NotFound,
        };
        debug!(
            principal_id = %claims.principal_id,
            principal_type = %claims.kind,
            reason = ?rejection,
            "refresh token not usable"
        );
        Err(rejection.into())
    }

    /// Idempotent: unknown and already revoked tokens are fine.
    ///
    /// # Errors
    /// Returns `Internal` on store failure.
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let changed = self.store.revoke_refresh_token(token).await?;
        debug!(changed, "refresh token revoke");
        Ok(())
    }

    /// Revoke every outstanding refresh token of a principal.
    ///
    /// # Errors
    /// Returns `Internal` on store failure.
    pub async fn revoke_all(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
    ) -> Result<u64, AuthError> {
        let revoked = self
            .store
            .revoke_all_refresh_tokens(principal_id, kind)
            .await?;
        info!(
            principal_id = %principal_id,
            principal_type = %kind,
            revoked,
            "refresh tokens revoked"
        );
        Ok(revoked)
    }

    /// # Errors
    /// Returns `Internal` on store failure.
    pub async fn sweep(&self) -> Result<u64, AuthError> {
        self.sweep_at(Utc::now()).await
    }

    /// Delete rows that are expired or revoked as of `now`.
    ///
    /// # Errors
    /// Returns `Internal` on store failure.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<u64, AuthError> {
        Ok(self.store.delete_stale_refresh_tokens(now).await?)
    }
}

/// Run the ledger sweep on a fixed interval until the runtime shuts down.
pub fn spawn_sweeper(ledger: Arc<RefreshLedger>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match ledger.sweep().await {
                Ok(0) => {}
                Ok(deleted) => info!(deleted, "refresh token sweep"),
                Err(err) => error!("refresh token sweep failed: {err}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use anyhow::Result;
    use chrono::Duration as ChronoDuration;
    use secrecy::SecretString;

    fn ledger() -> Result<(RefreshLedger, Arc<MemoryStore>)> {
        let store = Arc::new(MemoryStore::new());
        let codec = TokenCodec::new(
            SecretString::from("ledger-test-secret-0123456789abcdef"),
            ChronoDuration::minutes(15),
            ChronoDuration::days(30),
        )?;
        Ok((RefreshLedger::new(store.clone(), Arc::new(codec)), store))
    }

    fn id(value: i64) -> Result<PrincipalId> {
        Ok(PrincipalId::new(value)?)
    }

    #[tokio::test]
    async fn issued_token_validates() -> Result<()> {
        let (ledger, _) = ledger()?;
        let record = ledger.issue(id(7)?, PrincipalKind::User).await?;
        assert!(!record.is_revoked);

        let validated = ledger.validate(&record.token).await?;
        assert_eq!(validated.id, record.id);
        assert_eq!(validated.principal_id, id(7)?);
        assert_eq!(validated.kind, PrincipalKind::User);
        Ok(())
    }

    #[tokio::test]
    async fn tokens_issued_in_same_second_are_distinct() -> Result<()> {
        let (ledger, _) = ledger()?;
        let now = Utc::now();
        let first = ledger.issue_at(id(1)?, PrincipalKind::Admin, now).await?;
        let second = ledger.issue_at(id(1)?, PrincipalKind::Admin, now).await?;
        assert_ne!(first.token, second.token);
        Ok(())
    }

    #[tokio::test]
    async fn revoked_token_is_rejected() -> Result<()> {
        let (ledger, _) = ledger()?;
        let record = ledger.issue(id(2)?, PrincipalKind::Device).await?;
        ledger.revoke(&record.token).await?;
        assert!(matches!(
            ledger.validate(&record.token).await,
            Err(AuthError::RefreshTokenRevoked)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn revoke_is_idempotent() -> Result<()> {
        let (ledger, store) = ledger()?;
        let record = ledger.issue(id(3)?, PrincipalKind::User).await?;
        ledger.revoke(&record.token).await?;
        ledger.revoke(&record.token).await?;
        ledger.revoke("never-issued").await?;

        let rows = store.refresh_tokens().await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_revoked);
        Ok(())
    }

    #[tokio::test]
    async fn expired_token_is_rejected() -> Result<()> {
        let (ledger, _) = ledger()?;
        let issued_at = Utc::now() - ChronoDuration::days(31);
        let record = ledger.issue_at(id(4)?, PrincipalKind::User, issued_at).await?;
        assert!(matches!(
            ledger.validate(&record.token).await,
            Err(AuthError::RefreshTokenExpired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_and_garbage_tokens_are_not_found() -> Result<()> {
        let (ledger, _) = ledger()?;
        assert!(matches!(
            ledger.validate("not.a.token").await,
            Err(AuthError::RefreshTokenNotFound)
        ));

        // Correctly signed but never persisted.
        let (other, _) = ledger_with_shared_codec(&ledger);
        let orphan = other.issue(id(5)?, PrincipalKind::User).await?;
        assert!(matches!(
            ledger.validate(&orphan.token).await,
            Err(AuthError::RefreshTokenNotFound)
        ));
        Ok(())
    }

    fn ledger_with_shared_codec(ledger: &RefreshLedger) -> (RefreshLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            RefreshLedger::new(store.clone(), Arc::clone(&ledger.codec)),
            store,
        )
    }

    #[tokio::test]
    async fn access_token_is_not_a_refresh_token() -> Result<()> {
        let (ledger, _) = ledger()?;
        let access = ledger.codec.issue_access(id(6)?, PrincipalKind::User, 1)?;
        assert!(matches!(
            ledger.validate(&access.token).await,
            Err(AuthError::RefreshTokenTypeMismatch)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn revoke_all_only_touches_one_principal() -> Result<()> {
        let (ledger, _) = ledger()?;
        let a1 = ledger.issue(id(1)?, PrincipalKind::User).await?;
        let a2 = ledger.issue(id(1)?, PrincipalKind::User).await?;
        let admin = ledger.issue(id(1)?, PrincipalKind::Admin).await?;

        assert_eq!(ledger.revoke_all(id(1)?, PrincipalKind::User).await?, 2);
        assert!(ledger.validate(&a1.token).await.is_err());
        assert!(ledger.validate(&a2.token).await.is_err());
        assert!(ledger.validate(&admin.token).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_rows() -> Result<()> {
        let (ledger, store) = ledger()?;
        let now = Utc::now();
        let live = ledger.issue_at(id(1)?, PrincipalKind::User, now).await?;
        ledger
            .issue_at(id(2)?, PrincipalKind::User, now - ChronoDuration::days(40))
            .await?;
        let revoked = ledger.issue_at(id(3)?, PrincipalKind::User, now).await?;
        ledger.revoke(&revoked.token).await?;

        assert_eq!(ledger.sweep_at(now).await?, 2);
        let rows = store.refresh_tokens().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].token, live.token);
        assert!(rows.iter().all(|row| !row.is_revoked && row.expires_at >= now));
        Ok(())
    }
}
