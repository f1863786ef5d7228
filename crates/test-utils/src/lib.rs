pub mod builders;
pub mod console;
pub mod watcher;

use std::sync::{Arc, Once};
use std::time::Duration;

use runbook::console::Console;
use runbook::engine::{Engine, EngineSettings};
use runbook::watch::WatcherFactory;
use tracing_subscriber::{EnvFilter, fmt};

pub use builders::{NodeBuilder, RunnerPlanBuilder, config_from_toml};
pub use console::RecordingConsole;
pub use watcher::ManualWatcherFactory;

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer() // print only for failing tests unless --nocapture
            .with_target(true)
            .init();
    });
}

/// Run a future with a 10-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(10), f)
        .await
        .expect("Test timed out after 10 seconds")
}

/// Engine timings shortened so tests finish quickly.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        debounce: Duration::from_millis(100),
        restart_grace: Duration::from_secs(2),
        shutdown_drain: Duration::from_secs(3),
        port_poll: Duration::from_millis(50),
        port_log_interval: Duration::from_millis(200),
        default_port_timeout: 2.0,
    }
}

/// Engine with fast settings that records its console output.
pub fn test_engine(console: &Arc<RecordingConsole>) -> Engine {
    Engine::builder()
        .settings(fast_settings())
        .console(Arc::clone(console) as Arc<dyn Console>)
        .build()
}

/// Like [`test_engine`], with file changes injected by hand.
pub fn test_engine_with_watcher(
    console: &Arc<RecordingConsole>,
    watchers: &Arc<ManualWatcherFactory>,
) -> Engine {
    Engine::builder()
        .settings(fast_settings())
        .console(Arc::clone(console) as Arc<dyn Console>)
        .watchers(Arc::clone(watchers) as Arc<dyn WatcherFactory>)
        .build()
}
