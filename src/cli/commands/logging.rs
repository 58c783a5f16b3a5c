use clap::{Arg, ArgAction, Command, builder::ValueParser};

pub const ARG_VERBOSITY: &str = "verbosity";

/// Accept either a count (`0`..`4`) or a level name for `CUSTODIA_LOG_LEVEL`.
fn parse_log_level(level: &str) -> Result<u8, String> {
    if let Ok(count) = level.parse::<u8>()
        && count <= 4
    {
        return Ok(count);
    }

    match level.to_lowercase().as_str() {
        "error" => Ok(0),
        "warn" => Ok(1),
        "info" => Ok(2),
        "debug" => Ok(3),
        "trace" => Ok(4),
        _ => Err(format!("invalid log level '{level}'")),
    }
}

#[must_use]
pub fn validator_log_level() -> ValueParser {
    ValueParser::from(parse_log_level)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_VERBOSITY)
            .short('v')
            .long("verbose")
            .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
            .env("CUSTODIA_LOG_LEVEL")
            .global(true)
            .action(ArgAction::Count)
            .value_parser(validator_log_level()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verbosity(args: &[&str]) -> u8 {
        let command = with_args(Command::new("test"));
        command
            .get_matches_from(args)
            .get_one::<u8>(ARG_VERBOSITY)
            .copied()
            .unwrap_or(0)
    }

    #[test]
    fn count_flags() {
        temp_env::with_vars([("CUSTODIA_LOG_LEVEL", None::<&str>)], || {
            assert_eq!(verbosity(&["test"]), 0);
            assert_eq!(verbosity(&["test", "-vv"]), 2);
            assert_eq!(verbosity(&["test", "-vvvv"]), 4);
        });
    }

    #[test]
    fn level_names() {
        for (name, expected) in [
            ("error", 0u8),
            ("WARN", 1),
            ("info", 2),
            ("debug", 3),
            ("trace", 4),
            ("3", 3),
        ] {
            assert_eq!(parse_log_level(name), Ok(expected), "{name}");
        }
        assert!(parse_log_level("loud").is_err());
        assert!(parse_log_level("7").is_err());
    }
}
