//! Auth error taxonomy and its HTTP mapping.
//!
//! Every variant renders a fixed, generic message. Token failures collapse into
//! "invalid token" so a caller cannot tell which check rejected it. Store and
//! transaction failures become `Internal`; the detail is logged server-side and
//! never rendered.
//!
//! Re-authentication contract: a 401 carrying `WWW-Authenticate: Bearer` with
//! `error="invalid_token"` (revoked, expired or invalid access token, invalid
//! refresh token) means the client must log in again. It must not retry the
//! same credential.

use crate::store::StoreError;
use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, error};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("missing bearer token")]
    Unauthenticated,
    #[error("malformed token")]
    TokenMalformed,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token signature")]
    TokenInvalidSignature,
    #[error("token revoked")]
    TokenRevoked,
    #[error("wrong token kind")]
    TokenWrongKind,
    #[error("unknown principal type")]
    UnknownPrincipalType,
    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },
    #[error("permission denied")]
    PermissionDenied,
    #[error("refresh token not found")]
    RefreshTokenNotFound,
    #[error("refresh token revoked")]
    RefreshTokenRevoked,
    #[error("refresh token expired")]
    RefreshTokenExpired,
    #[error("refresh token does not match its principal")]
    RefreshTokenTypeMismatch,
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("resource already exists")]
    Conflict,
    #[error("resource not found")]
    NotFound,
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::Unauthenticated
            | Self::TokenMalformed
            | Self::TokenExpired
            | Self::TokenInvalidSignature
            | Self::TokenRevoked
            | Self::TokenWrongKind
            | Self::UnknownPrincipalType
            | Self::RefreshTokenNotFound
            | Self::RefreshTokenRevoked
            | Self::RefreshTokenExpired
            | Self::RefreshTokenTypeMismatch => StatusCode::UNAUTHORIZED,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict => StatusCode::CONFLICT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-visible message. Stable per kind.
    #[must_use]
    pub const fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid credentials",
            Self::Unauthenticated => "Authorization header with a bearer token is required",
            Self::TokenMalformed
            | Self::TokenInvalidSignature
            | Self::TokenWrongKind
            | Self::UnknownPrincipalType => "Invalid token",
            Self::TokenExpired => "Token expired",
            Self::TokenRevoked => "Token has been revoked. Please login again",
            Self::RefreshTokenNotFound
            | Self::RefreshTokenRevoked
            | Self::RefreshTokenExpired
            | Self::RefreshTokenTypeMismatch => "Invalid refresh token. Please login again",
            Self::RateLimitExceeded { .. } => "Too many requests",
            Self::PermissionDenied => "Permission denied",
            Self::InvalidRequest(reason) => reason,
            Self::Conflict => "Resource already exists",
            Self::NotFound => "Resource not found",
            Self::Internal(_) => "Internal server error",
        }
    }

    /// True when the client has to log in again instead of retrying.
    #[must_use]
    pub const fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::TokenMalformed
                | Self::TokenExpired
                | Self::TokenInvalidSignature
                | Self::TokenRevoked
                | Self::TokenWrongKind
                | Self::UnknownPrincipalType
                | Self::RefreshTokenNotFound
                | Self::RefreshTokenRevoked
                | Self::RefreshTokenExpired
                | Self::RefreshTokenTypeMismatch
        )
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => Self::Conflict,
            StoreError::Backend(err) => Self::Internal(err),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Internal(err) = &self {
            error!("auth internal error: {err:#}");
        } else {
            debug!(status = status.as_u16(), reason = %self, "auth request rejected");
        }

        let mut headers = HeaderMap::new();
        if status == StatusCode::UNAUTHORIZED {
            let challenge = if self.requires_reauthentication() {
                "Bearer error=\"invalid_token\""
            } else {
                "Bearer"
            };
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }
        if let Self::RateLimitExceeded { retry_after_secs } = &self
            && let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string())
        {
            headers.insert(header::RETRY_AFTER, value);
        }

        let body = Json(json!({
            "success": false,
            "error": self.public_message(),
        }));

        (status, headers, body).into_response()
    }
}
