pub mod admin;
pub mod auth;
pub mod health;
pub mod users;

use crate::auth::{AuthError, PrincipalId, PrincipalKind, principal::Principal};
use axum::{Json, extract::rejection::JsonRejection, http::StatusCode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

/// Success envelope: `{"success": true, "data": ...}`.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

/// Failure envelope, rendered by `AuthError`.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
}

pub(crate) fn ok<T: Serialize>(data: T) -> (StatusCode, Json<Envelope<T>>) {
    respond(StatusCode::OK, data)
}

pub(crate) fn created<T: Serialize>(data: T) -> (StatusCode, Json<Envelope<T>>) {
    respond(StatusCode::CREATED, data)
}

fn respond<T: Serialize>(status: StatusCode, data: T) -> (StatusCode, Json<Envelope<T>>) {
    (
        status,
        Json(Envelope {
            success: true,
            data,
        }),
    )
}

/// Unwrap a JSON body. Every rejection becomes an enveloped 400; parser
/// details are logged, never returned.
pub(crate) fn require_payload<T>(
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, AuthError> {
    match payload {
        Ok(Json(payload)) => Ok(payload),
        Err(JsonRejection::MissingJsonContentType(_)) => {
            Err(AuthError::InvalidRequest("Missing payload"))
        }
        Err(rejection) => {
            debug!("rejected request body: {}", rejection.body_text());
            Err(AuthError::InvalidRequest("Invalid payload"))
        }
    }
}

/// Like [`require_payload`], but a request without a JSON body yields the default.
pub(crate) fn optional_payload<T: Default>(
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, AuthError> {
    match payload {
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        payload => require_payload(payload),
    }
}

/// Ids in admin paths. Anything that is not a strict positive integer cannot
/// name a principal.
pub(crate) fn path_id(raw: &str) -> Result<PrincipalId, AuthError> {
    PrincipalId::parse_param(raw).ok_or(AuthError::NotFound)
}

/// Public view of a principal. Secrets and versions stay server-side.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct PrincipalView {
    pub id: PrincipalId,
    pub principal_type: PrincipalKind,
    /// Email for admins and users, device id for devices.
    pub identifier: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Principal> for PrincipalView {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id,
            principal_type: principal.kind,
            identifier: principal.lookup_key,
            name: principal.display_name,
            status: principal.status,
            last_seen_at: principal.last_seen_at,
            created_at: principal.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_id_rejects_non_numeric() {
        assert!(path_id("12").is_ok());
        assert!(matches!(path_id("abc"), Err(AuthError::NotFound)));
        assert!(matches!(path_id("-1"), Err(AuthError::NotFound)));
        assert!(matches!(path_id("0"), Err(AuthError::NotFound)));
    }

    #[derive(Deserialize, Default, Debug, PartialEq, Eq)]
    struct Sample {
        #[serde(default)]
        name: String,
    }

    #[derive(Deserialize, Debug)]
    struct Strict {
        #[allow(dead_code)]
        token: String,
    }

    #[test]
    fn malformed_or_incomplete_payload_is_bad_request() {
        let result = require_payload(Json::<Sample>::from_bytes(b"{not json"));
        assert!(matches!(result, Err(AuthError::InvalidRequest("Invalid payload"))));

        let result = require_payload(Json::<Strict>::from_bytes(b"{}"));
        assert!(matches!(result, Err(AuthError::InvalidRequest("Invalid payload"))));

        let result = optional_payload(Json::<Sample>::from_bytes(b"[1"));
        assert!(matches!(result, Err(AuthError::InvalidRequest("Invalid payload"))));
    }

    #[test]
    fn well_formed_payload_passes_through() {
        let result = require_payload(Json::<Sample>::from_bytes(br#"{"name":"a"}"#));
        assert!(result.is_ok_and(|sample| sample.name == "a"));
    }
}
