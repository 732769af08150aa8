use std::env;

use super::types::{ConfigError, Environment};
use crate::session::Language;

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_positive_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    match parse_u64(field, value)? {
        0 => Err(ConfigError::InvalidValue { field, value: "0".to_string() }),
        parsed => Ok(parsed),
    }
}

/// Positive and no larger than `max`.
pub(super) fn parse_bounded_u64(
    field: &'static str,
    value: String,
    max: u64,
) -> Result<u64, ConfigError> {
    match parse_positive_u64(field, value)? {
        parsed if parsed > max => Err(ConfigError::InvalidValue { field, value: parsed.to_string() }),
        parsed => Ok(parsed),
    }
}

pub(super) fn parse_language(field: &'static str, value: String) -> Result<Language, ConfigError> {
    value.parse::<Language>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_backend_url(value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim_end_matches('/').to_string();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::InvalidBackendUrl(value));
    }
    reqwest::Url::parse(&trimmed).map_err(|_| ConfigError::InvalidBackendUrl(value.clone()))?;
    Ok(trimmed)
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|item| item.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("1"));
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("yes"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("0"));
    }

    #[test]
    fn parse_environment_variants() {
        assert_eq!(parse_environment(Some("prod".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("production".to_string())), Environment::Production);
        assert_eq!(parse_environment(Some("staging".to_string())), Environment::Staging);
        assert_eq!(parse_environment(Some("testing".to_string())), Environment::Test);
        assert_eq!(parse_environment(None), Environment::Development);
    }

    #[test]
    fn parse_backend_url_strips_trailing_slash() {
        let parsed = parse_backend_url("http://grader.local:5000/".to_string()).expect("url");
        assert_eq!(parsed, "http://grader.local:5000");
    }

    #[test]
    fn parse_backend_url_rejects_non_http() {
        let err = parse_backend_url("ftp://grader.local".to_string()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBackendUrl(_)));
    }

    #[test]
    fn parse_positive_rejects_zero() {
        let err = parse_positive_u64("ASSESSMENT_TIME_LIMIT_SECONDS", "0".to_string()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "ASSESSMENT_TIME_LIMIT_SECONDS", .. }
        ));
    }

    #[test]
    fn parse_bounded_rejects_values_above_max() {
        assert_eq!(parse_bounded_u64("LIMIT", "60".to_string(), 60).expect("bounded"), 60);
        let err = parse_bounded_u64("LIMIT", "61".to_string(), 60).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "LIMIT", ref value } if value == "61"));
        assert!(parse_bounded_u64("LIMIT", "0".to_string(), 60).is_err());
    }

    #[test]
    fn parse_language_accepts_known_names() {
        assert_eq!(
            parse_language("ASSESSMENT_DEFAULT_LANGUAGE", "cpp".to_string()).expect("language"),
            Language::Cpp
        );
        assert!(parse_language("ASSESSMENT_DEFAULT_LANGUAGE", "cobol".to_string()).is_err());
    }
}
