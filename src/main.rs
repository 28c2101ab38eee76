//! camwatch: keep the latest frame of a network camera available

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use camwatch::capture::GstStreamSource;
use camwatch::{utils, CameraEngine, Config, EngineState, StartOutcome};
use color_eyre::Result;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    utils::init_tracing("camwatch=info");

    info!("camwatch launching...");

    // Load configuration: optional TOML path, then CAMWATCH_* overrides
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    info!("Camera: {:?}", config.camera);

    let source = Arc::new(GstStreamSource::new()?);
    let engine = Arc::new(CameraEngine::with_options(
        config.connection_parameters(),
        Arc::new(config.resolver()),
        source,
        config.engine_options(),
    ));

    start_engine(&engine).await?;

    // Periodic stats, retrying start while the camera is unreachable
    let interval = Duration::from_secs(config.metrics.report_interval_secs.max(1));
    let reporter = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if engine.state() == EngineState::Idle {
                    if let Err(e) = start_engine(&engine).await {
                        warn!("Start task failed: {}", e);
                    }
                }
                utils::log_engine_stats(&engine);
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received");
    reporter.abort();

    let stopping = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || stopping.stop()).await?;

    info!("camwatch shutting down");
    Ok(())
}

/// `start()` blocks on the network, keep it off the async workers
async fn start_engine(engine: &Arc<CameraEngine>) -> Result<()> {
    let engine = Arc::clone(engine);
    let outcome = tokio::task::spawn_blocking(move || engine.start()).await?;

    if let StartOutcome::Failed(e) = outcome {
        warn!("Camera not reachable yet ({}), will retry", e);
    }
    Ok(())
}
