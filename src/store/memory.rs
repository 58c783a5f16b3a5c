//! In-process store with the same semantics as `PgStore`.
//!
//! A single mutex covers principals and the ledger, so each trait method is
//! atomic the way a Postgres transaction would be.

use super::{CredentialStore, NewRefreshToken, RefreshTokenRecord, RefreshTokenStore, StoreError};
use crate::auth::principal::{
    INITIAL_TOKEN_VERSION, NewPrincipal, Principal, PrincipalId, PrincipalKind,
};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Inner {
    principals: HashMap<(PrincipalKind, PrincipalId), Principal>,
    next_principal_id: HashMap<PrincipalKind, i64>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
    next_refresh_id: i64,
}

impl Inner {
    fn principal_mut(&mut self, kind: PrincipalKind, id: PrincipalId) -> Option<&mut Principal> {
        self.principals.get_mut(&(kind, id))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a principal's version, e.g. to start from an existing session history.
    pub async fn set_token_version(&self, kind: PrincipalKind, id: PrincipalId, version: i64) {
        if let Some(principal) = self.inner.lock().await.principal_mut(kind, id) {
            principal.token_version = version;
        }
    }

    /// Snapshot of every ledger row, ordered by id.
    pub async fn refresh_tokens(&self) -> Vec<RefreshTokenRecord> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<_> = inner.refresh_tokens.values().cloned().collect();
        rows.sort_by_key(|row| row.id);
        rows
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_principal(&self, new: &NewPrincipal) -> Result<Principal, StoreError> {
        let mut inner = self.inner.lock().await;
        let duplicate = inner
            .principals
            .values()
            .any(|p| p.kind == new.kind && p.lookup_key == new.lookup_key);
        if duplicate {
            return Err(StoreError::Conflict);
        }

        let next = inner.next_principal_id.entry(new.kind).or_insert(0);
        *next += 1;
        let id = PrincipalId::new(*next).map_err(|_| anyhow!("principal id space exhausted"))?;

        let principal = Principal {
            id,
            kind: new.kind,
            lookup_key: new.lookup_key.clone(),
            display_name: new.display_name.clone(),
            secret_hash: new.secret_hash.clone(),
            token_version: INITIAL_TOKEN_VERSION,
            last_seen_at: None,
            status: new.kind.spec().tracks_status.then(|| "inactive".to_string()),
            created_at: Utc::now(),
        };
        inner.principals.insert((new.kind, id), principal.clone());
        Ok(principal)
    }

    async fn find_principal(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
    ) -> Result<Option<Principal>, StoreError> {
        Ok(self.inner.lock().await.principals.get(&(kind, id)).cloned())
    }

    async fn find_by_lookup_key(
        &self,
        kind: PrincipalKind,
        lookup_key: &str,
    ) -> Result<Option<Principal>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .principals
            .values()
            .find(|p| p.kind == kind && p.lookup_key == lookup_key)
            .cloned())
    }

    async fn token_version(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
    ) -> Result<Option<i64>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.principals.get(&(kind, id)).map(|p| p.token_version))
    }

    async fn record_sign_in(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Option<i64>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.principal_mut(kind, id).map(|principal| {
            if kind.spec().sign_in_bumps_version {
                principal.token_version += 1;
            }
            if kind.spec().tracks_status {
                principal.status = Some("active".to_string());
            }
            principal.last_seen_at = Some(now);
            principal.token_version
        }))
    }

    async fn bump_token_version(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
    ) -> Result<Option<i64>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.principal_mut(kind, id).map(|principal| {
            principal.token_version += 1;
            principal.token_version
        }))
    }

    async fn replace_secret(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
        secret_hash: &str,
    ) -> Result<Option<i64>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.principal_mut(kind, id).map(|principal| {
            principal.secret_hash = secret_hash.to_string();
            principal.token_version += 1;
            principal.token_version
        }))
    }

    async fn count_principals(&self, kind: PrincipalKind) -> Result<i64, StoreError> {
        let inner = self.inner.lock().await;
        let count = inner.principals.keys().filter(|(k, _)| *k == kind).count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn insert_refresh_token(
        &self,
        new: &NewRefreshToken,
    ) -> Result<RefreshTokenRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.refresh_tokens.contains_key(&new.token) {
            return Err(StoreError::Conflict);
        }
        inner.next_refresh_id += 1;
        let record = RefreshTokenRecord {
            id: inner.next_refresh_id,
            token: new.token.clone(),
            principal_id: new.principal_id,
            kind: new.kind,
            expires_at: new.expires_at,
            is_revoked: false,
            created_at: Utc::now(),
        };
        inner
            .refresh_tokens
            .insert(record.token.clone(), record.clone());
        Ok(record)
    }

    async fn find_usable_refresh_token(
        &self,
        token: &str,
        principal_id: PrincipalId,
        kind: PrincipalKind,
        now: DateTime<Utc>,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .refresh_tokens
            .get(token)
            .filter(|row| {
                row.principal_id == principal_id
                    && row.kind == kind
                    && !row.is_revoked
                    && row.expires_at > now
            })
            .cloned())
    }

    async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self.inner.lock().await.refresh_tokens.get(token).cloned())
    }

    async fn revoke_refresh_token(&self, token: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(match inner.refresh_tokens.get_mut(token) {
            Some(row) if !row.is_revoked => {
                row.is_revoked = true;
                true
            }
            _ => false,
        })
    }

    async fn revoke_all_refresh_tokens(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let mut revoked = 0;
        for row in inner.refresh_tokens.values_mut() {
            if row.principal_id == principal_id && row.kind == kind && !row.is_revoked {
                row.is_revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_stale_refresh_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let before = inner.refresh_tokens.len();
        inner
            .refresh_tokens
            .retain(|_, row| !row.is_revoked && row.expires_at >= now);
        Ok(u64::try_from(before - inner.refresh_tokens.len()).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(email: &str) -> NewPrincipal {
        NewPrincipal {
            kind: PrincipalKind::User,
            lookup_key: email.to_string(),
            display_name: "Test".to_string(),
            secret_hash: "hash".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_lookup_key_conflicts_per_kind() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.create_principal(&new_user("a@example.com")).await?;
        let err = store.create_principal(&new_user("a@example.com")).await;
        assert!(matches!(err, Err(StoreError::Conflict)));

        let mut admin = new_user("a@example.com");
        admin.kind = PrincipalKind::Admin;
        assert!(store.create_principal(&admin).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn device_sign_in_activates_without_bump() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let device = store
            .create_principal(&NewPrincipal {
                kind: PrincipalKind::Device,
                lookup_key: "dev-1".to_string(),
                display_name: "Sensor".to_string(),
                secret_hash: "digest".to_string(),
            })
            .await?;
        assert_eq!(device.status.as_deref(), Some("inactive"));

        let version = store
            .record_sign_in(PrincipalKind::Device, device.id, Utc::now())
            .await?;
        assert_eq!(version, Some(INITIAL_TOKEN_VERSION));

        let stored = store.find_principal(PrincipalKind::Device, device.id).await?;
        assert_eq!(
            stored.and_then(|p| p.status),
            Some("active".to_string())
        );
        Ok(())
    }

    #[tokio::test]
    async fn stale_rows_are_deleted() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let user = store.create_principal(&new_user("b@example.com")).await?;
        let now = Utc::now();
        for (token, offset) in [("old", -10), ("fresh", 10), ("revoked", 10)] {
            store
                .insert_refresh_token(&NewRefreshToken {
                    token: token.to_string(),
                    principal_id: user.id,
                    kind: PrincipalKind::User,
                    expires_at: now + Duration::seconds(offset),
                })
                .await?;
        }
        store.revoke_refresh_token("revoked").await?;

        assert_eq!(store.delete_stale_refresh_tokens(now).await?, 2);
        let left: Vec<_> = store
            .refresh_tokens()
            .await
            .into_iter()
            .map(|row| row.token)
            .collect();
        assert_eq!(left, vec!["fresh".to_string()]);
        Ok(())
    }
}
