use std::io::IsTerminal;

use anyhow::Context;
use tracing_subscriber::{fmt, EnvFilter};

use crate::core::config::Settings;

pub(crate) fn init_tracing(settings: &Settings) -> anyhow::Result<()> {
    let telemetry = settings.telemetry();
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive(&telemetry.log_level))
            .context("Invalid ASSESSMENT_LOG_LEVEL")?,
    };

    // stdout carries the headless event stream, so logs go to stderr.
    let builder = fmt().with_env_filter(filter).with_target(false).with_writer(std::io::stderr);

    let installed = if telemetry.json {
        builder
            .json()
            .flatten_event(true)
            .with_span_events(fmt::format::FmtSpan::CLOSE)
            .try_init()
    } else {
        builder
            .with_ansi(std::io::stderr().is_terminal())
            .with_span_events(fmt::format::FmtSpan::CLOSE)
            .try_init()
    };

    installed.map_err(|err| anyhow::anyhow!(err.to_string()))
}

/// A bare level applies to this crate only; HTTP client internals stay at `warn`.
fn default_directive(log_level: &str) -> String {
    if log_level.contains('=') || log_level.contains(',') {
        return log_level.to_string();
    }
    format!("warn,coding_assessment={log_level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_level_is_scoped_to_the_crate() {
        assert_eq!(default_directive("debug"), "warn,coding_assessment=debug");
        assert_eq!(default_directive("info,reqwest=debug"), "info,reqwest=debug");
    }
}
