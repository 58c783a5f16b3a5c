//! # Custodia (token authentication and authorization)
//!
//! `custodia` issues and verifies bearer tokens for three kinds of principals:
//! admins and users (email + password) and devices (device id + API key).
//!
//! ## Tokens
//!
//! - **Access tokens** are short-lived HS256 tokens carrying the principal id,
//!   type and `token_version`. They are never stored.
//! - **Refresh tokens** are long-lived, signed and recorded in the refresh
//!   token ledger. They only mint new access tokens.
//!
//! ## Revocation
//!
//! Each principal has a monotonic `token_version`. Admin and user logins,
//! logout and secret resets bump it; every authenticated request compares the
//! token's version against the stored one, so older access tokens stop working
//! immediately.
//!
//! ## Authorization
//!
//! Routes are gated by principal type (`admin`, `user`) or by
//! "self or admin", which compares the caller's id with the `{id}` path
//! parameter after a strict numeric parse.

pub mod api;
pub mod auth;
pub mod cli;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
