use thiserror::Error;

use crate::session::Language;

#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(super) runtime: RuntimeSettings,
    pub(super) backend: BackendSettings,
    pub(super) identity: IdentitySettings,
    pub(super) exam: ExamSettings,
    pub(super) telemetry: TelemetrySettings,
}

#[derive(Debug, Clone)]
pub(crate) struct BackendSettings {
    pub(crate) base_url: String,
    pub(crate) api_prefix: String,
    pub(crate) connect_timeout_seconds: u64,
    pub(crate) request_timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct IdentitySettings {
    pub(crate) drive_id: Option<String>,
    pub(crate) candidate_id: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct ExamSettings {
    pub(crate) time_limit_seconds: u64,
    pub(crate) default_language: Language,
    pub(crate) require_fullscreen: bool,
    pub(crate) submit_retry_attempts: u32,
    pub(crate) submit_retry_delay_seconds: u64,
}

#[derive(Debug, Clone)]
pub(crate) struct TelemetrySettings {
    pub(crate) log_level: String,
    pub(crate) json: bool,
    pub(crate) prometheus_enabled: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSettings {
    pub(crate) environment: Environment,
    pub(crate) strict_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Environment {
    Development,
    Production,
    Staging,
    Test,
}

impl Environment {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Test => "test",
        }
    }

    pub(super) fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("invalid backend url: {0}")]
    InvalidBackendUrl(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("missing required setting {0}")]
    MissingValue(&'static str),
}

impl BackendSettings {
    /// Base URL joined with the route prefix, without a trailing slash.
    pub(crate) fn api_root(&self) -> String {
        let prefix = self.api_prefix.trim_matches('/');
        if prefix.is_empty() {
            return self.base_url.clone();
        }
        format!("{}/{}", self.base_url, prefix)
    }
}

impl IdentitySettings {
    pub(crate) fn require(&self) -> Result<(&str, &str), ConfigError> {
        let drive_id =
            self.drive_id.as_deref().ok_or(ConfigError::MissingValue("ASSESSMENT_DRIVE_ID"))?;
        let candidate_id = self
            .candidate_id
            .as_deref()
            .ok_or(ConfigError::MissingValue("ASSESSMENT_CANDIDATE_ID"))?;
        Ok((drive_id, candidate_id))
    }
}
