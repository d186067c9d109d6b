//! Chronicle engine entry point.

use std::error::Error;

use chronicle_core::config::EngineConfig;
use chronicle_runtime::engine::Engine;
use chronicle_runtime::{demo, telemetry};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = EngineConfig::from_env()?;
    telemetry::init_tracing(config.log_format)?;

    tracing::info!("Starting Chronicle engine");

    let engine = Engine::build(config)?;
    engine.resume().await?;

    let (stop, stopped) = watch::channel(false);
    let projection = engine.spawn_projections(stopped);

    if std::env::args().any(|arg| arg == "--demo") {
        demo::run(&engine).await?;
    }

    tracing::info!("Engine running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    stop.send_replace(true);
    let report = projection.await??;
    tracing::info!(
        processed = report.processed,
        skipped = report.skipped,
        position = report.position,
        "order summary projection stopped"
    );
    engine.shutdown().await;

    Ok(())
}
