//! Admin-only endpoints: dashboard, device provisioning and credential resets.

use super::{Envelope, ErrorBody, PrincipalView, created, ok, path_id, require_payload};
use crate::auth::{AuthError, AuthState, DeviceCredentials, PrincipalId, PrincipalKind};
use axum::{
    Json,
    extract::{Extension, Path, rejection::JsonRejection},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Dashboard {
    pub admins: i64,
    pub users: i64,
    pub devices: i64,
}

#[derive(ToSchema, Deserialize)]
pub struct ProvisionDeviceRequest {
    device_id: String,
    name: String,
}

/// Device plus its API key. The key is shown once.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DeviceKeyData {
    pub device: PrincipalView,
    pub api_key: String,
}

impl From<DeviceCredentials> for DeviceKeyData {
    fn from(credentials: DeviceCredentials) -> Self {
        Self {
            device: credentials.device.into(),
            api_key: credentials.api_key,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PasswordResetData {
    pub id: PrincipalId,
    /// Generated password, shown once.
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RevokeData {
    pub revoked_refresh_tokens: u64,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/dashboard",
    responses(
        (status = 200, description = "Principal counts", body = Envelope<Dashboard>),
        (status = 403, description = "Admins only", body = ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn dashboard(state: Extension<Arc<AuthState>>) -> Result<impl IntoResponse, AuthError> {
    let counts = state.authenticator().principal_counts().await?;
    Ok(ok(Dashboard {
        admins: counts.admins,
        users: counts.users,
        devices: counts.devices,
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/devices",
    request_body = ProvisionDeviceRequest,
    responses(
        (status = 201, description = "Device provisioned", body = Envelope<DeviceKeyData>),
        (status = 400, description = "Invalid device id or name", body = ErrorBody),
        (status = 409, description = "Device id already taken", body = ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
#[instrument(skip_all)]
pub async fn provision_device(
    state: Extension<Arc<AuthState>>,
    payload: Result<Json<ProvisionDeviceRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AuthError> {
    let request = require_payload(payload)?;
    let credentials = state
        .authenticator()
        .provision_device(&request.device_id, &request.name)
        .await?;
    Ok(created(DeviceKeyData::from(credentials)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/devices/{id}/reset-key",
    params(("id" = i64, Path, description = "Device principal id")),
    responses(
        (status = 200, description = "New API key; the old key and tokens stop working", body = Envelope<DeviceKeyData>),
        (status = 404, description = "No such device", body = ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn reset_device_key(
    state: Extension<Arc<AuthState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AuthError> {
    let credentials = state.authenticator().rotate_device_key(path_id(&id)?).await?;
    Ok(ok(DeviceKeyData::from(credentials)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/reset-password",
    params(("id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Password replaced with a generated one", body = Envelope<PasswordResetData>),
        (status = 404, description = "No such user", body = ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn reset_user_password(
    state: Extension<Arc<AuthState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AuthError> {
    let id = path_id(&id)?;
    let password = state.authenticator().reset_user_password(id).await?;
    Ok(ok(PasswordResetData { id, password }))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/principals/{kind}/{id}/revoke",
    params(
        ("kind" = PrincipalKind, Path, description = "admin, user or device"),
        ("id" = i64, Path, description = "Principal id"),
    ),
    responses(
        (status = 200, description = "Access and refresh tokens revoked", body = Envelope<RevokeData>),
        (status = 400, description = "Unknown principal type", body = ErrorBody),
        (status = 404, description = "No such principal", body = ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn revoke_sessions(
    state: Extension<Arc<AuthState>>,
    Path((kind, id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AuthError> {
    let kind = kind
        .parse::<PrincipalKind>()
        .map_err(|_| AuthError::InvalidRequest("Unknown principal type"))?;
    let revoked = state
        .authenticator()
        .revoke_sessions(kind, path_id(&id)?)
        .await?;
    Ok(ok(RevokeData {
        revoked_refresh_tokens: revoked,
    }))
}
