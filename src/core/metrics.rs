use std::sync::OnceLock;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

/// Grader round trips range from a cached verdict to a full compile-and-run.
const RUN_DURATION_BUCKETS: &[f64] = &[0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the in-process Prometheus recorder. Without it every session counter is a no-op.
pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .add_global_label("environment", settings.runtime().environment.as_str())
        .set_buckets_for_metric(
            Matcher::Full("assessment_run_duration_seconds".to_string()),
            RUN_DURATION_BUCKETS,
        )?
        .install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}
