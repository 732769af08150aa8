mod parsing;
mod settings;
mod types;

pub(crate) use types::{
    BackendSettings, ConfigError, Environment, ExamSettings, IdentitySettings, RuntimeSettings,
    Settings, TelemetrySettings,
};
