use crate::auth::{
    RateLimitConfig,
    config::{
        DEFAULT_RATE_LIMIT_IDLE_SECONDS, DEFAULT_RATE_LIMIT_PATHS,
        DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE, DEFAULT_RATE_LIMIT_SWEEP_INTERVAL_SECONDS,
        parse_paths,
    },
};
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_REQUESTS_PER_MINUTE: &str = "rate-limit-requests-per-minute";
pub const ARG_PATHS: &str = "rate-limit-paths";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "rate-limit-sweep-interval-seconds";
pub const ARG_IDLE_SECONDS: &str = "rate-limit-idle-seconds";
pub const ARG_TRUST_PROXY_HEADERS: &str = "trust-proxy-headers";

/// Build the limiter configuration from matches.
#[must_use]
pub fn parse(matches: &ArgMatches) -> RateLimitConfig {
    RateLimitConfig::new()
        .with_requests_per_minute(
            matches
                .get_one::<u32>(ARG_REQUESTS_PER_MINUTE)
                .copied()
                .unwrap_or(DEFAULT_RATE_LIMIT_REQUESTS_PER_MINUTE),
        )
        .with_limited_paths(parse_paths(
            matches
                .get_one::<String>(ARG_PATHS)
                .map_or(DEFAULT_RATE_LIMIT_PATHS, String::as_str),
        ))
        .with_sweep_interval_seconds(
            matches
                .get_one::<u64>(ARG_SWEEP_INTERVAL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_RATE_LIMIT_SWEEP_INTERVAL_SECONDS),
        )
        .with_idle_seconds(
            matches
                .get_one::<u64>(ARG_IDLE_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_RATE_LIMIT_IDLE_SECONDS),
        )
        .with_trust_proxy_headers(matches.get_flag(ARG_TRUST_PROXY_HEADERS))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REQUESTS_PER_MINUTE)
                .long(ARG_REQUESTS_PER_MINUTE)
                .help("Requests per minute per client on limited routes, 0 disables limiting")
                .env("CUSTODIA_RATE_LIMIT_REQUESTS_PER_MINUTE")
                .default_value("60")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_PATHS)
                .long(ARG_PATHS)
                .help("Comma separated route templates to limit, e.g. /api/v1/auth/login")
                .env("CUSTODIA_RATE_LIMIT_PATHS")
                .default_value(DEFAULT_RATE_LIMIT_PATHS),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("How often idle client buckets are dropped")
                .env("CUSTODIA_RATE_LIMIT_SWEEP_INTERVAL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_IDLE_SECONDS)
                .long(ARG_IDLE_SECONDS)
                .help("Idle time after which a client bucket is dropped")
                .env("CUSTODIA_RATE_LIMIT_IDLE_SECONDS")
                .default_value("1200")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_TRUST_PROXY_HEADERS)
                .long(ARG_TRUST_PROXY_HEADERS)
                .help("Key clients by X-Forwarded-For / X-Real-IP instead of the peer address")
                .env("CUSTODIA_TRUST_PROXY_HEADERS")
                .action(ArgAction::SetTrue),
        )
}
