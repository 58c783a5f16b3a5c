use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());
static DEVICE_ID: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").ok());

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn valid_email(email_normalized: &str) -> bool {
    EMAIL
        .as_ref()
        .is_some_and(|regex| regex.is_match(email_normalized))
}

/// Device ids are operator-chosen: 1-64 characters, alphanumerics plus `._-`.
pub(crate) fn valid_device_id(device_id: &str) -> bool {
    DEVICE_ID
        .as_ref()
        .is_some_and(|regex| regex.is_match(device_id))
}

/// Trimmed, non-empty display name of bounded length.
pub(crate) fn clean_display_name(name: &str) -> Option<String> {
    let name = name.trim();
    (!name.is_empty() && name.chars().count() <= 100).then(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("ada@example.com"));
        assert!(!valid_email("ada@example"));
        assert!(!valid_email("ada example.com"));
        assert!(!valid_email(""));
    }

    #[test]
    fn device_ids() {
        assert!(valid_device_id("dev-1"));
        assert!(valid_device_id("sensor.rack_42"));
        assert!(!valid_device_id("-leading"));
        assert!(!valid_device_id("has space"));
        assert!(!valid_device_id(&"x".repeat(65)));
    }

    #[test]
    fn display_names() {
        assert_eq!(clean_display_name("  Ada "), Some("Ada".to_string()));
        assert_eq!(clean_display_name("   "), None);
        assert_eq!(clean_display_name(&"n".repeat(101)), None);
    }
}
