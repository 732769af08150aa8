pub(crate) mod core;
pub mod schemas;
pub mod services;
pub mod session;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use crate::core::{config::Settings, telemetry};

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    tracing::info!(
        environment = %settings.runtime().environment.as_str(),
        strict_config = settings.runtime().strict_config,
        "Coding assessment client starting"
    );

    tasks::headless::run(&settings).await
}
