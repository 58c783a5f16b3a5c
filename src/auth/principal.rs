//! Principal identity model.
//!
//! Every authenticable entity is one of three closed variants. Per-variant
//! behavior (backing table, lookup column, sign-in policy) is kept in a single
//! table on [`PrincipalKind`] so the gate, ledger and authenticator never
//! branch on raw type strings.

use super::error::AuthError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

/// Largest id that survives a round trip through a 53-bit integer claim.
pub const MAX_PRINCIPAL_ID: i64 = (1_i64 << 53) - 1;

/// Initial value of `token_version` for a freshly created principal.
pub const INITIAL_TOKEN_VERSION: i64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    Admin,
    User,
    Device,
}

/// Static per-variant behavior.
#[derive(Debug)]
pub struct KindSpec {
    pub name: &'static str,
    pub table: &'static str,
    pub lookup_column: &'static str,
    pub secret_column: &'static str,
    pub seen_column: &'static str,
    /// Password (Argon2 PHC) rather than API key (SHA-256 digest) credentials.
    pub password_secret: bool,
    /// Devices carry an `inactive`/`active` status flipped by authentication.
    pub tracks_status: bool,
    /// Admins and users start a new single session on every login. Devices keep
    /// their version across re-authentication.
    pub sign_in_bumps_version: bool,
}

static KIND_SPECS: [KindSpec; 3] = [
    KindSpec {
        name: "admin",
        table: "admins",
        lookup_column: "email",
        secret_column: "password_hash",
        seen_column: "last_login",
        password_secret: true,
        tracks_status: false,
        sign_in_bumps_version: true,
    },
    KindSpec {
        name: "user",
        table: "users",
        lookup_column: "email",
        secret_column: "password_hash",
        seen_column: "last_login",
        password_secret: true,
        tracks_status: false,
        sign_in_bumps_version: true,
    },
    KindSpec {
        name: "device",
        table: "devices",
        lookup_column: "device_id",
        secret_column: "api_key_hash",
        seen_column: "last_seen",
        password_secret: false,
        tracks_status: true,
        sign_in_bumps_version: false,
    },
];

impl PrincipalKind {
    pub const ALL: [Self; 3] = [Self::Admin, Self::User, Self::Device];

    #[must_use]
    pub fn spec(self) -> &'static KindSpec {
        match self {
            Self::Admin => &KIND_SPECS[0],
            Self::User => &KIND_SPECS[1],
            Self::Device => &KIND_SPECS[2],
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.spec().name
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalKind {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or(AuthError::UnknownPrincipalType)
    }
}

/// Numeric principal id, restricted to the range a 53-bit claim can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, ToSchema)]
#[serde(transparent)]
pub struct PrincipalId(i64);

impl PrincipalId {
    /// # Errors
    /// Returns `TokenMalformed` when the value is outside `1..=MAX_PRINCIPAL_ID`.
    pub fn new(value: i64) -> Result<Self, AuthError> {
        if (1..=MAX_PRINCIPAL_ID).contains(&value) {
            Ok(Self(value))
        } else {
            Err(AuthError::TokenMalformed)
        }
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }

    /// Strict decimal parse for path parameters: no sign, no whitespace.
    #[must_use]
    pub fn parse_param(value: &str) -> Option<Self> {
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        value.parse::<i64>().ok().and_then(|id| Self::new(id).ok())
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for PrincipalId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Self::new(raw).map_err(|_| serde::de::Error::custom("principal id out of range"))
    }
}

/// Stored principal record.
#[derive(Clone, Debug)]
pub struct Principal {
    pub id: PrincipalId,
    pub kind: PrincipalKind,
    /// Email for admins and users, device id for devices.
    pub lookup_key: String,
    pub display_name: String,
    /// Argon2 PHC string for passwords, hex SHA-256 digest for device keys.
    pub secret_hash: String,
    pub token_version: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a principal.
#[derive(Clone, Debug)]
pub struct NewPrincipal {
    pub kind: PrincipalKind,
    pub lookup_key: String,
    pub display_name: String,
    pub secret_hash: String,
}

/// Identity attached to an authenticated request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthContext {
    pub principal_id: PrincipalId,
    pub kind: PrincipalKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_wire_name() {
        for kind in PrincipalKind::ALL {
            assert_eq!(kind.as_str().parse::<PrincipalKind>().ok(), Some(kind));
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(
            "superuser".parse::<PrincipalKind>(),
            Err(AuthError::UnknownPrincipalType)
        ));
        assert!("Admin".parse::<PrincipalKind>().is_err());
    }

    #[test]
    fn kind_table_is_consistent() {
        assert_eq!(PrincipalKind::Admin.spec().table, "admins");
        assert_eq!(PrincipalKind::Device.spec().lookup_column, "device_id");
        assert!(!PrincipalKind::Device.spec().sign_in_bumps_version);
        assert!(PrincipalKind::User.spec().sign_in_bumps_version);
    }

    #[test]
    fn principal_id_range() {
        assert!(PrincipalId::new(0).is_err());
        assert!(PrincipalId::new(-4).is_err());
        assert!(PrincipalId::new(MAX_PRINCIPAL_ID).is_ok());
        assert!(PrincipalId::new(MAX_PRINCIPAL_ID + 1).is_err());
    }

    #[test]
    fn parse_param_is_strict() {
        assert_eq!(PrincipalId::parse_param("42").map(PrincipalId::get), Some(42));
        assert!(PrincipalId::parse_param("+42").is_none());
        assert!(PrincipalId::parse_param(" 42").is_none());
        assert!(PrincipalId::parse_param("42abc").is_none());
        assert!(PrincipalId::parse_param("4.2").is_none());
        assert!(PrincipalId::parse_param("").is_none());
        assert!(PrincipalId::parse_param("99999999999999999999").is_none());
    }

    #[test]
    fn principal_id_deserialize_checks_range() -> anyhow::Result<()> {
        let id: PrincipalId = serde_json::from_str("7")?;
        assert_eq!(id.get(), 7);
        assert!(serde_json::from_str::<PrincipalId>("0").is_err());
        assert!(serde_json::from_str::<PrincipalId>("1.5").is_err());
        assert!(serde_json::from_str::<PrincipalId>("9007199254740992").is_err());
        Ok(())
    }
}
