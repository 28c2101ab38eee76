use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::engine::CameraEngine;

/// Install the global fmt subscriber. `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

/// Log one line of engine health
pub fn log_engine_stats(engine: &CameraEngine) {
    let counters = engine.counters();

    match engine.get_latency_stats() {
        Some(stats) => info!(
            state = %engine.state(),
            frames = counters.frames_published,
            read_failures = counters.read_failures,
            reconnects = counters.reconnects,
            samples = stats.count,
            mean_ms = stats.mean.as_secs_f64() * 1000.0,
            min_ms = stats.min.as_secs_f64() * 1000.0,
            max_ms = stats.max.as_secs_f64() * 1000.0,
            p95_ms = stats.p95.as_secs_f64() * 1000.0,
            "Engine stats"
        ),
        None => info!(
            state = %engine.state(),
            read_failures = counters.read_failures,
            reconnects = counters.reconnects,
            "Engine stats: no frames yet"
        ),
    }
}
