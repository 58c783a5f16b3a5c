//! Credential checks, session issuance and version-based revocation.
//!
//! A sign-in moves through three states:
//! `Unauthenticated -> CredentialChecked -> SessionIssued`. Any failure before
//! `SessionIssued` ends in the same opaque `InvalidCredentials`, and an unknown
//! identifier costs the same hash work as a wrong secret.
//!
//! Access tokens are stateless. The only lever that kills them early is the
//! principal's `token_version`, re-read on every authenticated request. Refresh
//! tokens are rows in the ledger and are only affected by logout when the
//! configured [`LogoutPolicy`] says so.

use super::{
    config::LogoutPolicy,
    error::AuthError,
    ledger::RefreshLedger,
    principal::{AuthContext, NewPrincipal, Principal, PrincipalId, PrincipalKind},
    secret::{
        GENERATED_PASSWORD_LENGTH, api_key_matches, check_password_strength,
        digest_api_key, dummy_api_key_compare, dummy_verify_password, generate_api_key,
        generate_password, hash_password, verify_password,
    },
    token::{IssuedToken, TokenCodec},
    utils::{clean_display_name, normalize_email, valid_device_id, valid_email},
};
use crate::store::CredentialStore;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Access and refresh token pair handed out by a successful sign-in.
#[derive(Clone, Debug)]
pub struct Session {
    pub access: IssuedToken,
    pub refresh_token: String,
    pub principal_id: PrincipalId,
    pub kind: PrincipalKind,
    pub token_version: i64,
}

/// Fresh access token minted from a refresh token.
#[derive(Clone, Debug)]
pub struct AccessGrant {
    pub access: IssuedToken,
    pub principal_id: PrincipalId,
    pub kind: PrincipalKind,
}

/// A device record together with its plaintext API key. The key is only ever
/// available here; the store keeps its digest.
#[derive(Clone, Debug)]
pub struct DeviceCredentials {
    pub device: Principal,
    pub api_key: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrincipalCounts {
    pub admins: i64,
    pub users: i64,
    pub devices: i64,
}

pub struct Authenticator {
    credentials: Arc<dyn CredentialStore>,
    ledger: Arc<RefreshLedger>,
    codec: Arc<TokenCodec>,
    logout_policy: LogoutPolicy,
}

impl Authenticator {
    #[must_use]
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        ledger: Arc<RefreshLedger>,
        codec: Arc<TokenCodec>,
        logout_policy: LogoutPolicy,
    ) -> Self {
        Self {
            credentials,
            ledger,
            codec,
            logout_policy,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> Arc<RefreshLedger> {
        Arc::clone(&self.ledger)
    }

    #[must_use]
    pub const fn logout_policy(&self) -> LogoutPolicy {
        self.logout_policy
    }

    /// # Errors
    /// Returns `Internal` when the credential store is unreachable.
    pub async fn ping(&self) -> Result<(), AuthError> {
        Ok(self.credentials.ping().await?)
    }

    /// Password sign-in for admins and users.
    ///
    /// # Errors
    /// `InvalidCredentials` for an unknown identifier or a wrong secret.
    #[instrument(skip(self, identifier, secret), fields(principal_type = %kind))]
    pub async fn login(
        &self,
        kind: PrincipalKind,
        identifier: &str,
        secret: &str,
    ) -> Result<Session, AuthError> {
        if !kind.spec().password_secret {
            return Err(AuthError::InvalidRequest(
                "This principal type authenticates with an API key",
            ));
        }

        let identifier = normalize_email(identifier);
        let principal = self.credentials.find_by_lookup_key(kind, &identifier).await?;
        let stored_hash = principal.as_ref().map(|p| p.secret_hash.clone());
        if !check_password(secret.to_string(), stored_hash).await? {
            debug!(stage = "unauthenticated", "password sign-in rejected");
            return Err(AuthError::InvalidCredentials);
        }
        let Some(principal) = principal else {
            return Err(AuthError::InvalidCredentials);
        };

        self.sign_in(principal.kind, principal.id, Utc::now()).await
    }

    /// API key sign-in for devices. Wrong key and unknown device are
    /// indistinguishable.
    ///
    /// # Errors
    /// `InvalidCredentials` on any mismatch.
    #[instrument(skip(self, device_id, api_key))]
    pub async fn device_authenticate(
        &self,
        device_id: &str,
        api_key: &str,
    ) -> Result<Session, AuthError> {
        let principal = self
            .credentials
            .find_by_lookup_key(PrincipalKind::Device, device_id.trim())
            .await?;
        let matched = match &principal {
            Some(device) => api_key_matches(api_key, &device.secret_hash),
            None => {
                dummy_api_key_compare(api_key);
                false
            }
        };
        match principal {
            Some(device) if matched => self.sign_in(device.kind, device.id, Utc::now()).await,
            _ => {
                debug!(stage = "unauthenticated", "device sign-in rejected");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    /// `CredentialChecked -> SessionIssued`: stamp the sign-in (bumping the
    /// version where the kind does), then mint tokens at the resulting version.
    async fn sign_in(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let version = self
            .credentials
            .record_sign_in(kind, id, now)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        let session = self.issue_session(id, kind, version, now).await?;
        info!(
            principal_id = %id,
            principal_type = %kind,
            token_version = version,
            stage = "session_issued",
            "sign-in succeeded"
        );
        Ok(session)
    }

    async fn issue_session(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
        token_version: i64,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let access = self
            .codec
            .issue_access_at(principal_id, kind, token_version, now)?;
        let refresh = self.ledger.issue_at(principal_id, kind, now).await?;
        Ok(Session {
            access,
            refresh_token: refresh.token,
            principal_id,
            kind,
            token_version,
        })
    }

    /// Mint an access token at the principal's current version. The refresh
    /// token is neither rotated nor revoked.
    ///
    /// # Errors
    /// A refresh token error when the token is not usable.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<AccessGrant, AuthError> {
        let now = Utc::now();
        let record = self.ledger.validate_at(refresh_token, now).await?;
        let Some(version) = self
            .credentials
            .token_version(record.kind, record.principal_id)
            .await?
        else {
            debug!(principal_id = %record.principal_id, "refresh for a missing principal");
            return Err(AuthError::RefreshTokenNotFound);
        };
        let access = self
            .codec
            .issue_access_at(record.principal_id, record.kind, version, now)?;
        debug!(
            principal_id = %record.principal_id,
            principal_type = %record.kind,
            token_version = version,
            "access token refreshed"
        );
        Ok(AccessGrant {
            access,
            principal_id: record.principal_id,
            kind: record.kind,
        })
    }

    /// Verify an access token against the live version.
    ///
    /// # Errors
    /// Any codec error, or `TokenRevoked` when the version moved on or the
    /// principal is gone.
    pub async fn authenticate(&self, token: &str) -> Result<AuthContext, AuthError> {
        self.authenticate_at(token, Utc::now().timestamp()).await
    }

    /// # Errors
    /// Same as [`Self::authenticate`].
    pub async fn authenticate_at(&self, token: &str, now: i64) -> Result<AuthContext, AuthError> {
        let claims = self.codec.verify_access_at(token, now)?;
        let current = self
            .credentials
            .token_version(claims.kind, claims.principal_id)
            .await?;
        if current != Some(claims.token_version) {
            debug!(
                principal_id = %claims.principal_id,
                principal_type = %claims.kind,
                token_version = claims.token_version,
                current_version = ?current,
                "access token revoked"
            );
            return Err(AuthError::TokenRevoked);
        }
        Ok(AuthContext {
            principal_id: claims.principal_id,
            kind: claims.kind,
        })
    }

    /// End the caller's sessions by bumping the version. Refresh tokens are
    /// revoked too under `RevokeRefresh`. A refresh token presented with the
    /// request is always revoked when it belongs to the caller.
    ///
    /// # Errors
    /// `Internal` on store failure.
    #[instrument(skip(self, refresh_token), fields(principal_id = %ctx.principal_id, principal_type = %ctx.kind))]
    pub async fn logout(
        &self,
        ctx: AuthContext,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        let version = self
            .credentials
            .bump_token_version(ctx.kind, ctx.principal_id)
            .await?
            .ok_or(AuthError::TokenRevoked)?;

        if let Some(token) = refresh_token {
            match self.codec.verify_refresh(token) {
                Ok(claims) if claims.principal_id == ctx.principal_id && claims.kind == ctx.kind => {
                    self.ledger.revoke(token).await?;
                }
                _ => debug!("logout ignored a refresh token that is not the caller's"),
            }
        }
        if self.logout_policy.revokes_refresh_tokens() {
            self.ledger.revoke_all(ctx.principal_id, ctx.kind).await?;
        }

        info!(
            token_version = version,
            policy = self.logout_policy.as_str(),
            "logged out"
        );
        Ok(())
    }

    /// Store a new secret hash and bump the version in one step.
    ///
    /// # Errors
    /// `NotFound` for an unknown principal.
    pub async fn reset_secret(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
        new_secret_hash: &str,
    ) -> Result<i64, AuthError> {
        let version = self
            .credentials
            .replace_secret(kind, id, new_secret_hash)
            .await?
            .ok_or(AuthError::NotFound)?;
        if self.logout_policy.revokes_refresh_tokens() {
            self.ledger.revoke_all(id, kind).await?;
        }
        info!(
            principal_id = %id,
            principal_type = %kind,
            token_version = version,
            "secret replaced"
        );
        Ok(version)
    }

    /// Self-service password change. The caller's current access token dies
    /// with the version bump.
    ///
    /// # Errors
    /// `InvalidRequest` for a weak password, `InvalidCredentials` for a wrong
    /// current password.
    #[instrument(skip(self, current, new), fields(principal_id = %ctx.principal_id))]
    pub async fn change_password(
        &self,
        ctx: AuthContext,
        current: &str,
        new: &str,
    ) -> Result<i64, AuthError> {
        if !ctx.kind.spec().password_secret {
            return Err(AuthError::PermissionDenied);
        }
        check_password_strength(new).map_err(AuthError::InvalidRequest)?;
        if current == new {
            return Err(AuthError::InvalidRequest(
                "New password must differ from the current password",
            ));
        }

        let principal = self
            .credentials
            .find_principal(ctx.kind, ctx.principal_id)
            .await?
            .ok_or(AuthError::TokenRevoked)?;
        if !check_password(current.to_string(), Some(principal.secret_hash)).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let hash = hash_secret(new.to_string()).await?;
        self.reset_secret(ctx.kind, ctx.principal_id, &hash).await
    }

    /// Admin reset of a user's password. Returns the generated password.
    ///
    /// # Errors
    /// `NotFound` for an unknown user.
    pub async fn reset_user_password(&self, id: PrincipalId) -> Result<String, AuthError> {
        let password = generate_password(GENERATED_PASSWORD_LENGTH);
        let hash = hash_secret(password.clone()).await?;
        self.reset_secret(PrincipalKind::User, id, &hash).await?;
        Ok(password)
    }

    /// Full logout: revoke every refresh token and bump the version.
    ///
    /// # Errors
    /// `NotFound` for an unknown principal.
    pub async fn revoke_sessions(
        &self,
        kind: PrincipalKind,
        id: PrincipalId,
    ) -> Result<u64, AuthError> {
        let version = self
            .credentials
            .bump_token_version(kind, id)
            .await?
            .ok_or(AuthError::NotFound)?;
        let revoked = self.ledger.revoke_all(id, kind).await?;
        warn!(
            principal_id = %id,
            principal_type = %kind,
            token_version = version,
            revoked,
            "sessions revoked"
        );
        Ok(revoked)
    }

    /// Create a user and sign them in at the initial version.
    ///
    /// # Errors
    /// `InvalidRequest` for bad input, `Conflict` for a taken email.
    #[instrument(skip_all)]
    pub async fn register_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let name = clean_display_name(name).ok_or(AuthError::InvalidRequest("Name is required"))?;
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidRequest("Invalid email address"));
        }
        check_password_strength(password).map_err(AuthError::InvalidRequest)?;

        let secret_hash = hash_secret(password.to_string()).await?;
        let user = self
            .credentials
            .create_principal(&NewPrincipal {
                kind: PrincipalKind::User,
                lookup_key: email,
                display_name: name,
                secret_hash,
            })
            .await?;
        info!(principal_id = %user.id, "user registered");

        self.issue_session(user.id, user.kind, user.token_version, Utc::now())
            .await
    }

    /// Register a device and generate its first API key.
    ///
    /// # Errors
    /// `InvalidRequest` for a bad device id, `Conflict` when it is taken.
    pub async fn provision_device(
        &self,
        device_id: &str,
        name: &str,
    ) -> Result<DeviceCredentials, AuthError> {
        let device_id = device_id.trim();
        if !valid_device_id(device_id) {
            return Err(AuthError::InvalidRequest("Invalid device id"));
        }
        let name = clean_display_name(name).ok_or(AuthError::InvalidRequest("Name is required"))?;

        let api_key = generate_api_key().map_err(AuthError::Internal)?;
        let device = self
            .credentials
            .create_principal(&NewPrincipal {
                kind: PrincipalKind::Device,
                lookup_key: device_id.to_string(),
                display_name: name,
                secret_hash: digest_api_key(&api_key),
            })
            .await?;
        info!(principal_id = %device.id, device_id = %device.lookup_key, "device provisioned");
        Ok(DeviceCredentials { device, api_key })
    }

    /// Replace a device's API key. Outstanding access tokens die with the
    /// version bump.
    ///
    /// # Errors
    /// `NotFound` for an unknown device.
    pub async fn rotate_device_key(&self, id: PrincipalId) -> Result<DeviceCredentials, AuthError> {
        let api_key = generate_api_key().map_err(AuthError::Internal)?;
        self.reset_secret(PrincipalKind::Device, id, &digest_api_key(&api_key))
            .await?;
        let device = self.profile(PrincipalKind::Device, id).await?;
        Ok(DeviceCredentials { device, api_key })
    }

    /// # Errors
    /// `NotFound` for an unknown principal.
    pub async fn profile(&self, kind: PrincipalKind, id: PrincipalId) -> Result<Principal, AuthError> {
        self.credentials
            .find_principal(kind, id)
            .await?
            .ok_or(AuthError::NotFound)
    }

    /// # Errors
    /// `Internal` on store failure.
    pub async fn principal_counts(&self) -> Result<PrincipalCounts, AuthError> {
        Ok(PrincipalCounts {
            admins: self.credentials.count_principals(PrincipalKind::Admin).await?,
            users: self.credentials.count_principals(PrincipalKind::User).await?,
            devices: self.credentials.count_principals(PrincipalKind::Device).await?,
        })
    }

    /// Create the bootstrap admin when it does not exist yet. Returns the
    /// generated password only when an admin was created.
    ///
    /// # Errors
    /// `InvalidRequest` for a bad email, `Internal` on store failure.
    pub async fn seed_admin(&self, email: &str) -> Result<Option<String>, AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidRequest("Invalid seed admin email"));
        }
        if self
            .credentials
            .find_by_lookup_key(PrincipalKind::Admin, &email)
            .await?
            .is_some()
        {
            debug!("seed admin already exists");
            return Ok(None);
        }

        let password = generate_password(GENERATED_PASSWORD_LENGTH);
        let secret_hash = hash_secret(password.clone()).await?;
        let created = self
            .credentials
            .create_principal(&NewPrincipal {
                kind: PrincipalKind::Admin,
                lookup_key: email,
                display_name: "Administrator".to_string(),
                secret_hash,
            })
            .await;
        match created {
            Ok(_) => Ok(Some(password)),
            // Another instance seeded it first.
            Err(crate::store::StoreError::Conflict) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Argon2 is CPU bound; keep it off the async workers. A missing hash burns a
/// placeholder verification and fails.
async fn check_password(secret: String, stored_hash: Option<String>) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || match stored_hash {
        Some(hash) => verify_password(&secret, &hash),
        None => {
            dummy_verify_password(&secret);
            false
        }
    })
    .await
    .map_err(|err| AuthError::Internal(anyhow!("password verification task failed: {err}")))
}

async fn hash_secret(secret: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&secret))
        .await
        .map_err(|err| AuthError::Internal(anyhow!("password hashing task failed: {err}")))?
        .map_err(AuthError::Internal)
}
