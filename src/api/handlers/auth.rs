//! Sign-in, refresh and session endpoints.

use super::{
    Envelope, ErrorBody, PrincipalView, created, ok, optional_payload, require_payload,
};
use crate::auth::{
    AccessGrant, AuthContext, AuthError, AuthState, PrincipalId, PrincipalKind, Session,
};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[derive(ToSchema, Deserialize)]
pub struct DeviceAuthRequest {
    device_id: String,
    api_key: String,
}

#[derive(ToSchema, Deserialize)]
pub struct RefreshRequest {
    refresh_token: String,
}

#[derive(ToSchema, Deserialize, Default)]
pub struct LogoutRequest {
    /// Revoked as well when it belongs to the caller.
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(ToSchema, Deserialize)]
pub struct RegisterRequest {
    name: String,
    email: String,
    password: String,
}

#[derive(ToSchema, Deserialize)]
pub struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginData {
    pub token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub principal_id: PrincipalId,
    pub principal_type: PrincipalKind,
}

impl From<Session> for LoginData {
    fn from(session: Session) -> Self {
        Self {
            token: session.access.token,
            refresh_token: session.refresh_token,
            expires_at: session.access.expires_at,
            principal_id: session.principal_id,
            principal_type: session.kind,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RefreshData {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl From<AccessGrant> for RefreshData {
    fn from(grant: AccessGrant) -> Self {
        Self {
            token: grant.access.token,
            expires_at: grant.access.expires_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageData {
    pub message: String,
}

fn message(text: &str) -> MessageData {
    MessageData {
        message: text.to_string(),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Admin signed in", body = Envelope<LoginData>),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
        (status = 429, description = "Too many attempts from this address", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn admin_login(
    state: Extension<Arc<AuthState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require_payload(payload)?;
    let session = state
        .authenticator()
        .login(PrincipalKind::Admin, &request.email, &request.password)
        .await?;
    Ok(ok(LoginData::from(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/user/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "User signed in", body = Envelope<LoginData>),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn user_login(
    state: Extension<Arc<AuthState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require_payload(payload)?;
    let session = state
        .authenticator()
        .login(PrincipalKind::User, &request.email, &request.password)
        .await?;
    Ok(ok(LoginData::from(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/device",
    request_body = DeviceAuthRequest,
    responses(
        (status = 200, description = "Device signed in", body = Envelope<LoginData>),
        (status = 401, description = "Invalid credentials", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn device_login(
    state: Extension<Arc<AuthState>>,
    payload: Result<Json<DeviceAuthRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require_payload(payload)?;
    let session = state
        .authenticator()
        .device_authenticate(&request.device_id, &request.api_key)
        .await?;
    Ok(ok(LoginData::from(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token at the current version", body = Envelope<RefreshData>),
        (status = 401, description = "Refresh token is not usable; log in again", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(
    state: Extension<Arc<AuthState>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require_payload(payload)?;
    let grant = state.authenticator().refresh(&request.refresh_token).await?;
    Ok(ok(RefreshData::from(grant)))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    request_body(content = LogoutRequest, description = "Optional refresh token to revoke"),
    responses(
        (status = 200, description = "Access tokens issued so far are revoked", body = Envelope<MessageData>),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn logout(
    state: Extension<Arc<AuthState>>,
    ctx: AuthContext,
    payload: Result<Json<LogoutRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let request = optional_payload(payload)?;
    state
        .authenticator()
        .logout(ctx, request.refresh_token.as_deref())
        .await?;
    Ok(ok(message("Logged out")))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current principal", body = Envelope<PrincipalView>),
        (status = 401, description = "Missing or invalid access token", body = ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me(
    state: Extension<Arc<AuthState>>,
    ctx: AuthContext,
) -> Result<impl IntoResponse, AuthError> {
    let principal = state
        .authenticator()
        .profile(ctx.kind, ctx.principal_id)
        .await?;
    Ok(ok(PrincipalView::from(principal)))
}

#[utoipa::path(
    post,
    path = "/api/v1/user/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created and signed in", body = Envelope<LoginData>),
        (status = 400, description = "Invalid name, email or weak password", body = ErrorBody),
        (status = 409, description = "Email already registered", body = ErrorBody),
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    state: Extension<Arc<AuthState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require_payload(payload)?;
    let session = state
        .authenticator()
        .register_user(&request.name, &request.email, &request.password)
        .await?;
    Ok(created(LoginData::from(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/user/auth/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed; log in again", body = Envelope<MessageData>),
        (status = 400, description = "New password rejected by policy", body = ErrorBody),
        (status = 401, description = "Current password is wrong", body = ErrorBody),
        (status = 403, description = "Only users can change their password here", body = ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn change_password(
    state: Extension<Arc<AuthState>>,
    ctx: AuthContext,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require_payload(payload)?;
    state
        .authenticator()
        .change_password(ctx, &request.current_password, &request.new_password)
        .await?;
    Ok(ok(message("Password changed. Please login again")))
}
