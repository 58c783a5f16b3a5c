use crate::{
    api,
    auth::{AuthConfig, RateLimitConfig},
};
use anyhow::Result;
use secrecy::SecretString;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub jwt_secret: SecretString,
    pub auth_config: AuthConfig,
    pub rate_limit_config: RateLimitConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    api::new(
        args.port,
        args.dsn,
        args.jwt_secret,
        args.auth_config,
        args.rate_limit_config,
    )
    .await
}
