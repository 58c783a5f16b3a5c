pub mod auth;
pub mod logging;
pub mod rate_limit;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("custodia")
        .about("Token authentication for admins, users and devices")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("CUSTODIA_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("CUSTODIA_DSN")
                .required(true),
        );

    let command = auth::with_args(command);
    let command = rate_limit::with_args(command);
    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DSN: &str = "postgres://custodia@localhost:5432/custodia";

    #[test]
    fn test_new() {
        let command = new();

        assert_eq!(command.get_name(), "custodia");
        assert_eq!(
            command.get_about().map(ToString::to_string),
            Some("Token authentication for admins, users and devices".to_string())
        );
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn test_check_port_and_dsn() {
        temp_env::with_vars([("CUSTODIA_PORT", None::<&str>)], || {
            let matches = new().get_matches_from(vec![
                "custodia",
                "--port",
                "9090",
                "--dsn",
                DSN,
                "--jwt-secret",
                "secret",
            ]);

            assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(9090));
            assert_eq!(
                matches.get_one::<String>(ARG_DSN).cloned(),
                Some(DSN.to_string())
            );
        });
    }

    #[test]
    fn test_default_port() {
        temp_env::with_vars([("CUSTODIA_PORT", None::<&str>)], || {
            let matches =
                new().get_matches_from(vec!["custodia", "-d", DSN, "--jwt-secret", "secret"]);
            assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(8080));
        });
    }

    #[test]
    fn test_env_vars() {
        temp_env::with_vars(
            [
                ("CUSTODIA_PORT", Some("443")),
                ("CUSTODIA_DSN", Some(DSN)),
                ("CUSTODIA_JWT_SECRET", Some("from-env")),
            ],
            || {
                let matches = new().get_matches_from(vec!["custodia"]);
                assert_eq!(matches.get_one::<u16>(ARG_PORT).copied(), Some(443));
                assert_eq!(
                    matches.get_one::<String>(ARG_DSN).cloned(),
                    Some(DSN.to_string())
                );
                assert_eq!(
                    matches.get_one::<String>(auth::ARG_JWT_SECRET).cloned(),
                    Some("from-env".to_string())
                );
            },
        );
    }

    #[test]
    fn test_missing_dsn() {
        temp_env::with_vars(
            [
                ("CUSTODIA_DSN", None::<&str>),
                ("CUSTODIA_JWT_SECRET", None),
            ],
            || {
                let result = new().try_get_matches_from(vec!["custodia", "--jwt-secret", "x"]);
                assert!(result.is_err());
            },
        );
    }
}
