//! Request gate: bearer authentication and role checks.
//!
//! `require_auth` verifies the bearer token, re-reads the live token version and
//! attaches an [`AuthContext`] to the request. Role gates run after it and only
//! look at that context (and, for self-or-admin, the `id` path parameter).

use super::{
    error::AuthError,
    principal::{AuthContext, PrincipalId, PrincipalKind},
    state::AuthState,
};
use axum::{
    Extension,
    extract::{FromRequestParts, RawPathParams, Request},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::debug;

/// Name of the path parameter compared by [`RoleGate::SelfOrAdmin`].
pub const ID_PARAM: &str = "id";

/// Token from an `Authorization: Bearer <token>` header. The scheme is
/// case-insensitive; an empty token counts as missing.
#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Middleware: reject requests without a currently valid access token.
///
/// # Errors
/// `Unauthenticated` without a bearer token, otherwise whatever
/// [`Authenticator::authenticate`](super::authenticator::Authenticator::authenticate) rejects.
pub async fn require_auth(
    Extension(state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_bearer_token(request.headers()).ok_or(AuthError::Unauthenticated)?;
    let ctx = state.authenticator().authenticate(token).await?;
    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleGate {
    /// Only the given principal type passes.
    Only(PrincipalKind),
    /// Admins, or the principal whose id is in the `id` path parameter.
    SelfOrAdmin,
}

impl RoleGate {
    /// # Errors
    /// `Unauthenticated` when no context is attached, `PermissionDenied` when
    /// the context does not satisfy the gate.
    pub fn check(self, ctx: Option<&AuthContext>, path_id: Option<&str>) -> Result<(), AuthError> {
        let ctx = ctx.ok_or(AuthError::Unauthenticated)?;
        let allowed = match self {
            Self::Only(kind) => ctx.kind == kind,
            Self::SelfOrAdmin => {
                ctx.kind == PrincipalKind::Admin
                    || (ctx.kind == PrincipalKind::User
                        && path_id.and_then(PrincipalId::parse_param) == Some(ctx.principal_id))
            }
        };
        if allowed {
            Ok(())
        } else {
            debug!(
                principal_id = %ctx.principal_id,
                principal_type = %ctx.kind,
                gate = ?self,
                "role gate denied"
            );
            Err(AuthError::PermissionDenied)
        }
    }
}

/// # Errors
/// See [`RoleGate::check`].
pub async fn admin_required(request: Request, next: Next) -> Result<Response, AuthError> {
    RoleGate::Only(PrincipalKind::Admin).check(request.extensions().get(), None)?;
    Ok(next.run(request).await)
}

/// # Errors
/// See [`RoleGate::check`].
pub async fn user_required(request: Request, next: Next) -> Result<Response, AuthError> {
    RoleGate::Only(PrincipalKind::User).check(request.extensions().get(), None)?;
    Ok(next.run(request).await)
}

/// # Errors
/// See [`RoleGate::check`].
pub async fn self_or_admin_required(
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let path_id = params
        .iter()
        .find_map(|(name, value)| (name == ID_PARAM).then_some(value));
    RoleGate::SelfOrAdmin.check(request.extensions().get(), path_id)?;
    Ok(next.run(request).await)
}

/// Handlers behind `require_auth` take the context as an extractor.
impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .copied()
            .ok_or(AuthError::Unauthenticated)
    }
}
