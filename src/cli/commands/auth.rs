use crate::auth::{
    AuthConfig, LogoutPolicy,
    config::{
        DEFAULT_ACCESS_TOKEN_TTL_MINUTES, DEFAULT_REFRESH_SWEEP_INTERVAL_SECONDS,
        DEFAULT_REFRESH_TOKEN_TTL_DAYS,
    },
};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_ACCESS_TOKEN_TTL_MINUTES: &str = "access-token-ttl-minutes";
pub const ARG_REFRESH_TOKEN_TTL_DAYS: &str = "refresh-token-ttl-days";
pub const ARG_LOGOUT_POLICY: &str = "logout-policy";
pub const ARG_REFRESH_SWEEP_INTERVAL_SECONDS: &str = "refresh-sweep-interval-seconds";
pub const ARG_SEED_ADMIN_EMAIL: &str = "seed-admin-email";

/// Upper bounds keep every expiry well inside the timestamp range.
pub const MAX_ACCESS_TOKEN_TTL_MINUTES: i64 = 366 * 24 * 60;
pub const MAX_REFRESH_TOKEN_TTL_DAYS: i64 = 36_500;

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub config: AuthConfig,
}

impl Options {
    /// Parse token and session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .filter(|secret| !secret.trim().is_empty())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_JWT_SECRET}"))?;

        let config = AuthConfig::new()
            .with_access_token_ttl_minutes(
                matches
                    .get_one::<i64>(ARG_ACCESS_TOKEN_TTL_MINUTES)
                    .copied()
                    .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_MINUTES),
            )
            .with_refresh_token_ttl_days(
                matches
                    .get_one::<i64>(ARG_REFRESH_TOKEN_TTL_DAYS)
                    .copied()
                    .unwrap_or(DEFAULT_REFRESH_TOKEN_TTL_DAYS),
            )
            .with_refresh_sweep_interval_seconds(
                matches
                    .get_one::<u64>(ARG_REFRESH_SWEEP_INTERVAL_SECONDS)
                    .copied()
                    .unwrap_or(DEFAULT_REFRESH_SWEEP_INTERVAL_SECONDS),
            )
            .with_logout_policy(
                matches
                    .get_one::<LogoutPolicy>(ARG_LOGOUT_POLICY)
                    .copied()
                    .unwrap_or_default(),
            )
            .with_seed_admin_email(
                matches
                    .get_one::<String>(ARG_SEED_ADMIN_EMAIL)
                    .cloned()
                    .filter(|email| !email.trim().is_empty()),
            );

        Ok(Self {
            jwt_secret: SecretString::from(jwt_secret),
            config,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret used to sign access and refresh tokens")
                .env("CUSTODIA_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL_MINUTES)
                .long(ARG_ACCESS_TOKEN_TTL_MINUTES)
                .help("Access token lifetime in minutes")
                .env("CUSTODIA_ACCESS_TOKEN_TTL_MINUTES")
                .default_value("1440")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_ACCESS_TOKEN_TTL_MINUTES)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL_DAYS)
                .long(ARG_REFRESH_TOKEN_TTL_DAYS)
                .help("Refresh token lifetime in days")
                .env("CUSTODIA_REFRESH_TOKEN_TTL_DAYS")
                .default_value("365")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_REFRESH_TOKEN_TTL_DAYS)),
        )
        .arg(
            Arg::new(ARG_LOGOUT_POLICY)
                .long(ARG_LOGOUT_POLICY)
                .help("What logout does to refresh tokens: version-bump or revoke-refresh")
                .env("CUSTODIA_LOGOUT_POLICY")
                .default_value(LogoutPolicy::VersionBump.as_str())
                .value_parser(|value: &str| value.parse::<LogoutPolicy>()),
        )
        .arg(
            Arg::new(ARG_REFRESH_SWEEP_INTERVAL_SECONDS)
                .long(ARG_REFRESH_SWEEP_INTERVAL_SECONDS)
                .help("How often expired and revoked refresh tokens are deleted")
                .env("CUSTODIA_REFRESH_SWEEP_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SEED_ADMIN_EMAIL)
                .long(ARG_SEED_ADMIN_EMAIL)
                .help("Create this admin on startup when no admin exists yet")
                .env("CUSTODIA_SEED_ADMIN_EMAIL"),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const ENV: [(&str, Option<&str>); 6] = [
        ("CUSTODIA_JWT_SECRET", None),
        ("CUSTODIA_ACCESS_TOKEN_TTL_MINUTES", None),
        ("CUSTODIA_REFRESH_TOKEN_TTL_DAYS", None),
        ("CUSTODIA_LOGOUT_POLICY", None),
        ("CUSTODIA_REFRESH_SWEEP_INTERVAL_SECONDS", None),
        ("CUSTODIA_SEED_ADMIN_EMAIL", None),
    ];

    fn parse(args: &[&str]) -> anyhow::Result<Options> {
        let matches = with_args(Command::new("test")).try_get_matches_from(args)?;
        Options::parse(&matches)
    }

    #[test]
    fn defaults() {
        temp_env::with_vars(ENV, || {
            let options = parse(&["test", "--jwt-secret", "s3cret"]);
            assert!(options.is_ok());
            if let Ok(options) = options {
                assert_eq!(options.jwt_secret.expose_secret(), "s3cret");
                assert_eq!(
                    options.config.access_token_ttl(),
                    chrono::TimeDelta::try_minutes(1440)
                );
                assert_eq!(
                    options.config.refresh_token_ttl(),
                    chrono::TimeDelta::try_days(365)
                );
                assert_eq!(options.config.logout_policy(), LogoutPolicy::VersionBump);
                assert!(options.config.seed_admin_email().is_none());
            }
        });
    }

    #[test]
    fn overrides() {
        temp_env::with_vars(ENV, || {
            let options = parse(&[
                "test",
                "--jwt-secret",
                "s3cret",
                "--access-token-ttl-minutes",
                "15",
                "--refresh-token-ttl-days",
                "7",
                "--logout-policy",
                "revoke-refresh",
                "--seed-admin-email",
                "root@example.com",
            ]);
            assert!(options.is_ok());
            if let Ok(options) = options {
                assert_eq!(
                    options.config.access_token_ttl(),
                    chrono::TimeDelta::try_minutes(15)
                );
                assert_eq!(options.config.refresh_token_ttl(), chrono::TimeDelta::try_days(7));
                assert_eq!(options.config.logout_policy(), LogoutPolicy::RevokeRefresh);
                assert_eq!(options.config.seed_admin_email(), Some("root@example.com"));
            }
        });
    }

    #[test]
    fn rejects_blank_secret_and_bad_values() {
        temp_env::with_vars(ENV, || {
            assert!(parse(&["test", "--jwt-secret", "  "]).is_err());
            assert!(parse(&["test", "--jwt-secret", "s", "--logout-policy", "nope"]).is_err());
            assert!(
                parse(&["test", "--jwt-secret", "s", "--access-token-ttl-minutes", "0"]).is_err()
            );
        });
    }

    #[test]
    fn rejects_ttls_past_the_cap() {
        temp_env::with_vars(ENV, || {
            assert!(
                parse(&["test", "--jwt-secret", "s", "--refresh-token-ttl-days", "100000000"])
                    .is_err()
            );
            assert!(
                parse(&["test", "--jwt-secret", "s", "--refresh-token-ttl-days", "36501"]).is_err()
            );
            assert!(
                parse(&[
                    "test",
                    "--jwt-secret",
                    "s",
                    "--access-token-ttl-minutes",
                    "9223372036854775807",
                ])
                .is_err()
            );
            let options = parse(&["test", "--jwt-secret", "s", "--refresh-token-ttl-days", "36500"]);
            assert!(options.is_ok_and(|options| options.config.refresh_token_ttl().is_some()));
        });
    }
}
