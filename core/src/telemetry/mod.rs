//! Tracing setup and structured telemetry records.

pub mod events;

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_tracing() -> Result<()> {
    let fmt_layer = fmt::layer().with_target(true);
    let subscriber = Registry::default().with(env_filter()).with(fmt_layer);

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Console output plus a daily-rolling JSON log under `dir`. Keep the guard
/// alive for as long as logs should be flushed.
pub fn init_tracing_with_file(dir: &Path, file_prefix: &str) -> Result<WorkerGuard> {
    let appender = tracing_appender::rolling::daily(dir, file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let subscriber = Registry::default()
        .with(env_filter())
        .with(fmt::layer().with_target(true))
        .with(fmt::layer().json().with_writer(writer));

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(guard)
}
