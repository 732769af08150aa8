use super::parsing::{
    env_optional, env_or_default, parse_backend_url, parse_bool, parse_environment,
    parse_bounded_u64, parse_language, parse_positive_u64, parse_u32, parse_u64,
};
use super::types::{
    BackendSettings, ConfigError, ExamSettings, IdentitySettings, RuntimeSettings, Settings,
    TelemetrySettings,
};

/// One week. Longer limits are configuration mistakes.
const MAX_TIME_LIMIT_SECONDS: u64 = 7 * 24 * 60 * 60;

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let environment = parse_environment(
            env_optional("ASSESSMENT_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config = env_optional("ASSESSMENT_STRICT_CONFIG")
            .map(|value| parse_bool(&value))
            .unwrap_or(false)
            || environment.is_production();

        let base_url =
            parse_backend_url(env_or_default("ASSESSMENT_BACKEND_URL", "http://localhost:5000"))?;
        let api_prefix = env_or_default("ASSESSMENT_API_PREFIX", "/api/coding-assessment");
        let connect_timeout_seconds = parse_positive_u64(
            "ASSESSMENT_CONNECT_TIMEOUT_SECONDS",
            env_or_default("ASSESSMENT_CONNECT_TIMEOUT_SECONDS", "10"),
        )?;
        let request_timeout_seconds = parse_positive_u64(
            "ASSESSMENT_REQUEST_TIMEOUT_SECONDS",
            env_or_default("ASSESSMENT_REQUEST_TIMEOUT_SECONDS", "120"),
        )?;

        let drive_id = env_optional("ASSESSMENT_DRIVE_ID");
        let candidate_id = env_optional("ASSESSMENT_CANDIDATE_ID");

        let time_limit_seconds = parse_bounded_u64(
            "ASSESSMENT_TIME_LIMIT_SECONDS",
            env_or_default("ASSESSMENT_TIME_LIMIT_SECONDS", "3600"),
            MAX_TIME_LIMIT_SECONDS,
        )?;
        let default_language = parse_language(
            "ASSESSMENT_DEFAULT_LANGUAGE",
            env_or_default("ASSESSMENT_DEFAULT_LANGUAGE", "python"),
        )?;
        let require_fullscreen = env_optional("ASSESSMENT_REQUIRE_FULLSCREEN")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);
        let submit_retry_attempts = parse_u32(
            "ASSESSMENT_SUBMIT_RETRY_ATTEMPTS",
            env_or_default("ASSESSMENT_SUBMIT_RETRY_ATTEMPTS", "3"),
        )?;
        let submit_retry_delay_seconds = parse_u64(
            "ASSESSMENT_SUBMIT_RETRY_DELAY_SECONDS",
            env_or_default("ASSESSMENT_SUBMIT_RETRY_DELAY_SECONDS", "5"),
        )?;

        let log_level = env_or_default("ASSESSMENT_LOG_LEVEL", "info");
        let json =
            env_optional("ASSESSMENT_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled = env_optional("ASSESSMENT_PROMETHEUS_ENABLED")
            .map(|value| parse_bool(&value))
            .unwrap_or(false);

        let settings = Self {
            runtime: RuntimeSettings { environment, strict_config },
            backend: BackendSettings {
                base_url,
                api_prefix,
                connect_timeout_seconds,
                request_timeout_seconds,
            },
            identity: IdentitySettings { drive_id, candidate_id },
            exam: ExamSettings {
                time_limit_seconds,
                default_language,
                require_fullscreen,
                submit_retry_attempts,
                submit_retry_delay_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;

        Ok(settings)
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    pub(crate) fn backend(&self) -> &BackendSettings {
        &self.backend
    }

    pub(crate) fn identity(&self) -> &IdentitySettings {
        &self.identity
    }

    pub(crate) fn exam(&self) -> &ExamSettings {
        &self.exam
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.connect_timeout_seconds > self.backend.request_timeout_seconds {
            return Err(ConfigError::InvalidValue {
                field: "ASSESSMENT_CONNECT_TIMEOUT_SECONDS",
                value: self.backend.connect_timeout_seconds.to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        self.identity.require()?;

        Ok(())
    }
}
