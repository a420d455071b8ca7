use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod writer;

use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facelogd starting");

    let config = config::Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        text_log = %config.text_log_path.display(),
        threshold = config.match_threshold,
        policy = ?config.match_policy,
        dedup = ?config.dedup_key,
        "configuration loaded"
    );

    let engine = engine::spawn_engine(&config).context("failed to start recognition engine")?;

    let _conn = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceService::new(engine.clone()))?
        .build()
        .await
        .context("failed to register D-Bus service")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facelogd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facelogd shutting down");
    engine.shutdown().await.context("failed to flush recognition log")?;

    Ok(())
}
