//! Compact HS256 token codec.
//!
//! Tokens are `base64url(header).base64url(claims).base64url(signature)` with
//! HMAC-SHA-256 as the only accepted algorithm. Claims are decoded into typed
//! integers (no floats) and range-checked before anything else reads them.
//!
//! Verification order:
//! 1. exactly three non-empty segments
//! 2. header decodes and names `HS256`
//! 3. signature matches (constant-time)
//! 4. claims decode and pass range checks
//! 5. `token_kind` matches the expected kind
//! 6. `expires_at > now`

use super::{
    error::AuthError,
    principal::{PrincipalId, PrincipalKind},
};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use ulid::Ulid;

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "HS256";
const TOKEN_TYPE: &str = "JWT";
/// Below this many bytes an HS256 key is weaker than its digest.
pub const RECOMMENDED_SECRET_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("token signing secret must not be empty")]
    EmptySecret,
    #[error("token TTL must be positive and keep expiry timestamps in range")]
    InvalidTtl,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "access" => Some(Self::Access),
            "refresh" => Some(Self::Refresh),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    typ: Option<String>,
}

/// Wire claim set. Integers stay integers: serde rejects `1.0` or `1e3` for `i64`.
#[derive(Serialize, Deserialize)]
struct WireClaims {
    principal_id: i64,
    principal_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_version: Option<i64>,
    token_kind: String,
    issued_at: i64,
    expires_at: i64,
    /// Keeps tokens minted in the same second distinct.
    #[serde(default)]
    jti: String,
}

/// Verified access token claims.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessClaims {
    pub principal_id: PrincipalId,
    pub kind: PrincipalKind,
    pub token_version: i64,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Verified refresh token claims. No version: refresh re-reads the live one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefreshClaims {
    pub principal_id: PrincipalId,
    pub kind: PrincipalKind,
    pub issued_at: i64,
    pub expires_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

struct Verified {
    principal_id: PrincipalId,
    kind: PrincipalKind,
    token_version: Option<i64>,
    issued_at: i64,
    expires_at: i64,
}

pub struct TokenCodec {
    secret: SecretString,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &ALGORITHM)
            .field("secret", &"***")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

impl TokenCodec {
    /// # Errors
    /// Returns an error for an empty secret, a non-positive TTL, or a TTL that
    /// pushes the expiry past the largest representable timestamp. All are
    /// startup misconfigurations.
    pub fn new(
        secret: SecretString,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Result<Self, CodecError> {
        if secret.expose_secret().is_empty() {
            return Err(CodecError::EmptySecret);
        }
        if access_ttl <= Duration::zero() || refresh_ttl <= Duration::zero() {
            return Err(CodecError::InvalidTtl);
        }
        let now = Utc::now();
        if now.checked_add_signed(access_ttl).is_none()
            || now.checked_add_signed(refresh_ttl).is_none()
        {
            return Err(CodecError::InvalidTtl);
        }
        Ok(Self {
            secret,
            access_ttl,
            refresh_ttl,
        })
    }

    #[must_use]
    pub fn secret_is_short(&self) -> bool {
        self.secret.expose_secret().len() < RECOMMENDED_SECRET_BYTES
    }

    #[must_use]
    pub const fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub const fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// # Errors
    /// Returns `Internal` only if encoding fails or the expiry overflows.
    pub fn issue_access(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
        token_version: i64,
    ) -> Result<IssuedToken, AuthError> {
        self.issue_access_at(principal_id, kind, token_version, Utc::now())
    }

    /// # Errors
    /// Returns `Internal` only if encoding fails or the expiry overflows.
    pub fn issue_access_at(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
        token_version: i64,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        self.issue(
            principal_id,
            kind,
            Some(token_version),
            TokenKind::Access,
            now,
            expiry(now, self.access_ttl)?,
        )
    }

    /// # Errors
    /// Returns `Internal` only if encoding fails or the expiry overflows.
    pub fn issue_refresh(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
    ) -> Result<IssuedToken, AuthError> {
        self.issue_refresh_at(principal_id, kind, Utc::now())
    }

    /// # Errors
    /// Returns `Internal` only if encoding fails or the expiry overflows.
    pub fn issue_refresh_at(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        self.issue(
            principal_id,
            kind,
            None,
            TokenKind::Refresh,
            now,
            expiry(now, self.refresh_ttl)?,
        )
    }

    /// # Errors
    /// Returns the first failed check, see the module docs for the order.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.verify_access_at(token, Utc::now().timestamp())
    }

    /// # Errors
    /// Returns the first failed check, see the module docs for the order.
    pub fn verify_access_at(&self, token: &str, now: i64) -> Result<AccessClaims, AuthError> {
        let verified = self.verify(token, TokenKind::Access, now)?;
        let token_version = verified
            .token_version
            .filter(|version| *version >= 1)
            .ok_or(AuthError::TokenMalformed)?;
        Ok(AccessClaims {
            principal_id: verified.principal_id,
            kind: verified.kind,
            token_version,
            issued_at: verified.issued_at,
            expires_at: verified.expires_at,
        })
    }

    /// # Errors
    /// Returns the first failed check, see the module docs for the order.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        self.verify_refresh_at(token, Utc::now().timestamp())
    }

    /// # Errors
    /// Returns the first failed check, see the module docs for the order.
    pub fn verify_refresh_at(&self, token: &str, now: i64) -> Result<RefreshClaims, AuthError> {
        let verified = self.verify(token, TokenKind::Refresh, now)?;
        Ok(RefreshClaims {
            principal_id: verified.principal_id,
            kind: verified.kind,
            issued_at: verified.issued_at,
            expires_at: verified.expires_at,
        })
    }

    fn issue(
        &self,
        principal_id: PrincipalId,
        kind: PrincipalKind,
        token_version: Option<i64>,
        token_kind: TokenKind,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let claims = WireClaims {
            principal_id: principal_id.get(),
            principal_type: kind.as_str().to_string(),
            token_version,
            token_kind: token_kind.as_str().to_string(),
            issued_at: issued_at.timestamp(),
            expires_at: expires_at.timestamp(),
            jti: Ulid::new().to_string(),
        };
        let token = self.sign_claims(&claims)?;
        // Second precision on the wire, so report exactly what the token says.
        let expires_at = DateTime::from_timestamp(claims.expires_at, 0).unwrap_or(expires_at);
        Ok(IssuedToken { token, expires_at })
    }

    fn sign_claims(&self, claims: &WireClaims) -> Result<String, AuthError> {
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: Some(TOKEN_TYPE.to_string()),
        };
        let header = serde_json::to_vec(&header)
            .map_err(|err| AuthError::Internal(anyhow::Error::new(err)))?;
        let claims = serde_json::to_vec(claims)
            .map_err(|err| AuthError::Internal(anyhow::Error::new(err)))?;
        self.sign_segments(&header, &claims)
    }

    fn sign_segments(&self, header: &[u8], claims: &[u8]) -> Result<String, AuthError> {
        let signing_input = format!(
            "{}.{}",
            Base64UrlUnpadded::encode_string(header),
            Base64UrlUnpadded::encode_string(claims)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        Ok(format!(
            "{signing_input}.{}",
            Base64UrlUnpadded::encode_string(&signature)
        ))
    }

    fn mac(&self) -> Result<HmacSha256, AuthError> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|err| AuthError::Internal(anyhow::anyhow!("invalid HMAC key: {err}")))
    }

    fn verify(&self, token: &str, expected: TokenKind, now: i64) -> Result<Verified, AuthError> {
        let mut segments = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthError::TokenMalformed);
        };
        if header_b64.is_empty() || claims_b64.is_empty() || signature_b64.is_empty() {
            return Err(AuthError::TokenMalformed);
        }

        let header: Header = decode_json(header_b64)?;
        if header.alg != ALGORITHM {
            return Err(AuthError::TokenInvalidSignature);
        }
        if header.typ.as_deref().is_some_and(|typ| typ != TOKEN_TYPE) {
            return Err(AuthError::TokenMalformed);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| AuthError::TokenMalformed)?;
        let mut mac = self.mac()?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::TokenInvalidSignature)?;

        let claims: WireClaims = decode_json(claims_b64)?;
        let principal_id = PrincipalId::new(claims.principal_id)?;
        let kind: PrincipalKind = claims.principal_type.parse()?;
        let token_kind = TokenKind::parse(&claims.token_kind).ok_or(AuthError::TokenMalformed)?;
        if claims.issued_at < 0 || claims.expires_at < claims.issued_at {
            return Err(AuthError::TokenMalformed);
        }
        if token_kind != expected {
            return Err(AuthError::TokenWrongKind);
        }
        if claims.expires_at <= now {
            return Err(AuthError::TokenExpired);
        }

        Ok(Verified {
            principal_id,
            kind,
            token_version: claims.token_version,
            issued_at: claims.issued_at,
            expires_at: claims.expires_at,
        })
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, AuthError> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| AuthError::Internal(anyhow::anyhow!("token expiry out of range")))
}

fn decode_json<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, AuthError> {
    let bytes = Base64UrlUnpadded::decode_vec(segment).map_err(|_| AuthError::TokenMalformed)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::TokenMalformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::principal::MAX_PRINCIPAL_ID;

    const NOW: i64 = 1_700_000_000;

    fn codec() -> anyhow::Result<TokenCodec> {
        Ok(TokenCodec::new(
            SecretString::from("0123456789abcdef0123456789abcdef"),
            Duration::minutes(1440),
            Duration::days(365),
        )?)
    }

    fn id(value: i64) -> anyhow::Result<PrincipalId> {
        Ok(PrincipalId::new(value)?)
    }

    fn now() -> anyhow::Result<DateTime<Utc>> {
        DateTime::from_timestamp(NOW, 0).ok_or_else(|| anyhow::anyhow!("bad timestamp"))
    }

    fn claims_with_expiry(expires_at: i64) -> WireClaims {
        WireClaims {
            principal_id: 9,
            principal_type: "user".to_string(),
            token_version: Some(2),
            token_kind: "access".to_string(),
            issued_at: NOW - 60,
            expires_at,
            jti: "fixed".to_string(),
        }
    }

    #[test]
    fn empty_secret_is_rejected() {
        let result = TokenCodec::new(
            SecretString::from(""),
            Duration::minutes(1),
            Duration::days(1),
        );
        assert!(matches!(result, Err(CodecError::EmptySecret)));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let result = TokenCodec::new(
            SecretString::from("secret"),
            Duration::zero(),
            Duration::days(1),
        );
        assert!(matches!(result, Err(CodecError::InvalidTtl)));
    }

    #[test]
    fn unrepresentable_ttl_is_rejected() {
        let result = TokenCodec::new(
            SecretString::from("0123456789abcdef0123456789abcdef"),
            Duration::minutes(1440),
            Duration::days(100_000_000),
        );
        assert!(matches!(result, Err(CodecError::InvalidTtl)));

        let result = TokenCodec::new(
            SecretString::from("0123456789abcdef0123456789abcdef"),
            Duration::MAX,
            Duration::days(1),
        );
        assert!(matches!(result, Err(CodecError::InvalidTtl)));
    }

    #[test]
    fn expiry_overflow_is_internal_not_a_panic() -> anyhow::Result<()> {
        let codec = codec()?;
        let far = DateTime::<Utc>::MAX_UTC - Duration::days(1);
        assert!(matches!(
            codec.issue_refresh_at(id(1)?, PrincipalKind::User, far),
            Err(AuthError::Internal(_))
        ));
        assert!(matches!(
            codec.issue_access_at(id(1)?, PrincipalKind::User, 1, far),
            Err(AuthError::Internal(_))
        ));
        Ok(())
    }

    #[test]
    fn short_secret_is_flagged() -> anyhow::Result<()> {
        assert!(!codec()?.secret_is_short());
        let short = TokenCodec::new(
            SecretString::from("short"),
            Duration::minutes(5),
            Duration::days(1),
        )?;
        assert!(short.secret_is_short());
        Ok(())
    }

    #[test]
    fn access_token_round_trips_largest_id() -> anyhow::Result<()> {
        let codec = codec()?;
        let issued =
            codec.issue_access_at(id(MAX_PRINCIPAL_ID)?, PrincipalKind::Admin, 4, now()?)?;
        assert_eq!(issued.expires_at.timestamp(), NOW + 1440 * 60);
        assert_eq!(issued.token.split('.').count(), 3);

        let claims = codec.verify_access_at(&issued.token, NOW)?;
        assert_eq!(claims.principal_id.get(), MAX_PRINCIPAL_ID);
        assert_eq!(claims.kind, PrincipalKind::Admin);
        assert_eq!(claims.token_version, 4);
        assert_eq!(claims.issued_at, NOW);
        Ok(())
    }

    #[test]
    fn kinds_are_not_interchangeable() -> anyhow::Result<()> {
        let codec = codec()?;
        let refresh = codec.issue_refresh_at(id(3)?, PrincipalKind::Device, now()?)?;
        let access = codec.issue_access_at(id(3)?, PrincipalKind::Device, 1, now()?)?;

        assert!(matches!(
            codec.verify_access_at(&refresh.token, NOW),
            Err(AuthError::TokenWrongKind)
        ));
        assert!(matches!(
            codec.verify_refresh_at(&access.token, NOW),
            Err(AuthError::TokenWrongKind)
        ));
        assert_eq!(
            codec.verify_refresh_at(&refresh.token, NOW)?.kind,
            PrincipalKind::Device
        );
        Ok(())
    }

    #[test]
    fn expiry_boundary() -> anyhow::Result<()> {
        let codec = codec()?;
        let expired = codec.sign_claims(&claims_with_expiry(NOW - 1))?;
        let at_now = codec.sign_claims(&claims_with_expiry(NOW))?;
        let live = codec.sign_claims(&claims_with_expiry(NOW + 1))?;

        assert!(matches!(
            codec.verify_access_at(&expired, NOW),
            Err(AuthError::TokenExpired)
        ));
        assert!(matches!(
            codec.verify_access_at(&at_now, NOW),
            Err(AuthError::TokenExpired)
        ));
        assert_eq!(codec.verify_access_at(&live, NOW)?.expires_at, NOW + 1);
        Ok(())
    }

    #[test]
    fn same_second_tokens_differ() -> anyhow::Result<()> {
        let codec = codec()?;
        let first = codec.issue_refresh_at(id(1)?, PrincipalKind::User, now()?)?;
        let second = codec.issue_refresh_at(id(1)?, PrincipalKind::User, now()?)?;
        assert_ne!(first.token, second.token);
        Ok(())
    }

    #[test]
    fn other_algorithms_are_rejected() -> anyhow::Result<()> {
        let codec = codec()?;
        let claims = serde_json::to_vec(&claims_with_expiry(NOW + 60))?;
        for alg in ["none", "HS512", "RS256", "hs256"] {
            let header = format!(r#"{{"alg":"{alg}","typ":"JWT"}}"#);
            let token = codec.sign_segments(header.as_bytes(), &claims)?;
            assert!(matches!(
                codec.verify_access_at(&token, NOW),
                Err(AuthError::TokenInvalidSignature)
            ));
        }
        Ok(())
    }

    #[test]
    fn tampered_or_foreign_tokens_fail_signature() -> anyhow::Result<()> {
        let codec = codec()?;
        let issued = codec.issue_access_at(id(5)?, PrincipalKind::User, 1, now()?)?;

        let mut parts: Vec<&str> = issued.token.split('.').collect();
        let forged = serde_json::to_vec(&WireClaims {
            principal_id: 1,
            ..claims_with_expiry(NOW + 60)
        })?;
        let forged = Base64UrlUnpadded::encode_string(&forged);
        parts[1] = &forged;
        assert!(matches!(
            codec.verify_access_at(&parts.join("."), NOW),
            Err(AuthError::TokenInvalidSignature)
        ));

        let other = TokenCodec::new(
            SecretString::from("another-secret-another-secret-xx"),
            Duration::minutes(5),
            Duration::days(1),
        )?;
        assert!(matches!(
            other.verify_access_at(&issued.token, NOW),
            Err(AuthError::TokenInvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn structural_garbage_is_malformed() -> anyhow::Result<()> {
        let codec = codec()?;
        for token in ["", "a.b", "a.b.c.d", "..", "not-base64!.x.y"] {
            assert!(
                matches!(
                    codec.verify_access_at(token, NOW),
                    Err(AuthError::TokenMalformed)
                ),
                "{token}"
            );
        }
        Ok(())
    }

    #[test]
    fn float_and_out_of_range_claims_are_malformed() -> anyhow::Result<()> {
        let codec = codec()?;
        let header = br#"{"alg":"HS256","typ":"JWT"}"#;
        let bodies = [
            format!(
                r#"{{"principal_id":9.0,"principal_type":"user","token_version":1,"token_kind":"access","issued_at":{},"expires_at":{}}}"#,
                NOW,
                NOW + 60
            ),
            format!(
                r#"{{"principal_id":9007199254740992,"principal_type":"user","token_version":1,"token_kind":"access","issued_at":{},"expires_at":{}}}"#,
                NOW,
                NOW + 60
            ),
            format!(
                r#"{{"principal_id":9,"principal_type":"user","token_version":0,"token_kind":"access","issued_at":{},"expires_at":{}}}"#,
                NOW,
                NOW + 60
            ),
            format!(
                r#"{{"principal_id":9,"principal_type":"user","token_kind":"access","issued_at":{},"expires_at":{}}}"#,
                NOW,
                NOW + 60
            ),
        ];
        for body in bodies {
            let token = codec.sign_segments(header, body.as_bytes())?;
            assert!(
                matches!(
                    codec.verify_access_at(&token, NOW),
                    Err(AuthError::TokenMalformed)
                ),
                "{body}"
            );
        }
        Ok(())
    }

    #[test]
    fn unknown_principal_type_is_reported() -> anyhow::Result<()> {
        let codec = codec()?;
        let token = codec.sign_claims(&WireClaims {
            principal_type: "robot".to_string(),
            ..claims_with_expiry(NOW + 60)
        })?;
        assert!(matches!(
            codec.verify_access_at(&token, NOW),
            Err(AuthError::UnknownPrincipalType)
        ));
        Ok(())
    }

    #[test]
    fn debug_hides_secret() -> anyhow::Result<()> {
        let rendered = format!("{:?}", codec()?);
        assert!(!rendered.contains("0123456789abcdef"));
        Ok(())
    }
}
