//! Password and API key handling.
//!
//! Passwords are Argon2id PHC strings. Device API keys are high-entropy random
//! values, so a SHA-256 digest is enough at rest; comparison is constant-time.

use anyhow::{Context, Result, anyhow};
use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use once_cell::sync::Lazy;
use rand::{Rng, RngCore, rngs::OsRng, seq::SliceRandom};
use sha2::{Digest, Sha256};
use std::fmt::Write;
use subtle::ConstantTimeEq;
use tracing::error;

pub const MIN_PASSWORD_LENGTH: usize = 12;
pub const GENERATED_PASSWORD_LENGTH: usize = 16;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!@#$%^&*()-_=+[]{}|;:,.<>?";
const COMMON_PHRASES: [&str; 8] = [
    "password",
    "123456",
    "qwerty",
    "admin",
    "welcome",
    "password123",
    "admin123",
    "welcome123",
];

/// Placeholder verified against when the identifier does not exist, so the
/// miss costs the same as a wrong password.
static DUMMY_PASSWORD_HASH: Lazy<Option<String>> =
    Lazy::new(|| match hash_password("custodia-placeholder-secret") {
        Ok(hash) => Some(hash),
        Err(err) => {
            error!("failed to build placeholder password hash: {err:#}");
            None
        }
    });

/// Digest compared against when a device id is unknown.
const DUMMY_API_KEY_DIGEST: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Hash a password into an Argon2id PHC string.
///
/// # Errors
/// Returns an error if the OS RNG or the hasher fails.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut salt)
        .context("failed to generate password salt")?;
    let salt = SaltString::encode_b64(&salt).map_err(|err| anyhow!("invalid salt: {err}"))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// Unparseable stored hashes never match.
#[must_use]
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        error!("stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Build the placeholder hash now instead of on the first unknown login.
pub(crate) fn warm_dummy_hash() {
    Lazy::force(&DUMMY_PASSWORD_HASH);
}

#[cfg(test)]
pub(crate) fn dummy_hash_is_ready() -> bool {
    Lazy::get(&DUMMY_PASSWORD_HASH).is_some_and(Option::is_some)
}

/// Burn one verification against the placeholder hash.
pub fn dummy_verify_password(password: &str) {
    if let Some(hash) = DUMMY_PASSWORD_HASH.as_deref() {
        let _ = verify_password(password, hash);
    }
}

/// Generate a new device API key (32 random bytes, base64url).
///
/// # Errors
/// Returns an error if the OS RNG fails.
pub fn generate_api_key() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate API key")?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// Lowercase hex SHA-256 of an API key; this is what gets stored.
#[must_use]
pub fn digest_api_key(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    digest
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

#[must_use]
pub fn api_key_matches(candidate: &str, stored_digest: &str) -> bool {
    digest_api_key(candidate)
        .as_bytes()
        .ct_eq(stored_digest.as_bytes())
        .into()
}

/// Compare against a fixed digest so unknown device ids cost the same.
pub fn dummy_api_key_compare(candidate: &str) {
    let _ = api_key_matches(candidate, DUMMY_API_KEY_DIGEST);
}

/// Random password with at least one character of each class.
#[must_use]
pub fn generate_password(length: usize) -> String {
    let length = length.max(MIN_PASSWORD_LENGTH);
    let mut rng = OsRng;
    let all: Vec<u8> = [LOWER, UPPER, DIGITS, SPECIAL].concat();

    let mut password: Vec<u8> = [LOWER, UPPER, DIGITS, SPECIAL]
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    while password.len() < length {
        password.push(all[rng.gen_range(0..all.len())]);
    }
    password.shuffle(&mut rng);

    password.into_iter().map(char::from).collect()
}

/// Password policy for user-chosen passwords.
///
/// # Errors
/// Returns the first rule the password breaks.
pub fn check_password_strength(password: &str) -> Result<(), &'static str> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err("Password must be at least 12 characters long");
    }
    let bytes = password.as_bytes();
    let classes: [(&[u8], &'static str); 4] = [
        (LOWER, "Password must contain at least one lowercase letter"),
        (UPPER, "Password must contain at least one uppercase letter"),
        (DIGITS, "Password must contain at least one digit"),
        (SPECIAL, "Password must contain at least one special character"),
    ];
    for (class, message) in classes {
        if !bytes.iter().any(|byte| class.contains(byte)) {
            return Err(message);
        }
    }

    let lowered = password.to_lowercase();
    if COMMON_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        return Err("Password contains common or easily guessable phrases");
    }

    if bytes.windows(3).any(is_sequential) {
        return Err("Password contains sequential characters or numbers");
    }

    Ok(())
}

/// `abc`, `123` and their descending forms.
fn is_sequential(window: &[u8]) -> bool {
    let [a, b, c] = [window[0], window[1], window[2]];
    let same_class = (a.is_ascii_digit() && b.is_ascii_digit() && c.is_ascii_digit())
        || (a.is_ascii_alphabetic() && b.is_ascii_alphabetic() && c.is_ascii_alphabetic());
    if !same_class {
        return false;
    }
    let (a, b, c) = (
        a.to_ascii_lowercase(),
        b.to_ascii_lowercase(),
        c.to_ascii_lowercase(),
    );
    (b == a.wrapping_add(1) && c == b.wrapping_add(1))
        || (b == a.wrapping_sub(1) && c == b.wrapping_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warm_dummy_hash_builds_placeholder() {
        warm_dummy_hash();
        assert!(dummy_hash_is_ready());
    }

    #[test]
    fn password_hash_verifies() -> Result<()> {
        let hash = hash_password("Correct-Horse-9")?;
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Correct-Horse-9", &hash));
        assert!(!verify_password("Correct-Horse-8", &hash));
        Ok(())
    }

    #[test]
    fn garbage_hash_never_matches() {
        assert!(!verify_password("anything", "plaintext"));
    }

    #[test]
    fn api_key_digest_compare() -> Result<()> {
        let key = generate_api_key()?;
        let digest = digest_api_key(&key);
        assert_eq!(digest.len(), 64);
        assert!(api_key_matches(&key, &digest));
        assert!(!api_key_matches("wrong", &digest));
        assert!(!api_key_matches(&key, DUMMY_API_KEY_DIGEST));
        Ok(())
    }

    #[test]
    fn generated_password_passes_policy_classes() {
        let password = generate_password(GENERATED_PASSWORD_LENGTH);
        assert_eq!(password.len(), GENERATED_PASSWORD_LENGTH);
        assert!(password.bytes().any(|b| LOWER.contains(&b)));
        assert!(password.bytes().any(|b| UPPER.contains(&b)));
        assert!(password.bytes().any(|b| DIGITS.contains(&b)));
        assert!(password.bytes().any(|b| SPECIAL.contains(&b)));
        assert_eq!(generate_password(4).len(), MIN_PASSWORD_LENGTH);
    }

    #[test]
    fn strength_rules() {
        assert!(check_password_strength("Sh0rt!").is_err());
        assert!(check_password_strength("alllowercase1!x").is_err());
        assert!(check_password_strength("NoDigitsHere!!").is_err());
        assert!(check_password_strength("Password1!xyzQ").is_err());
        assert_eq!(
            check_password_strength("Zq9!Zq8!Tr6#abc"),
            Err("Password contains sequential characters or numbers")
        );
        assert!(check_password_strength("Zq9!Zq8!Tr6#xm").is_ok());
    }
}
