pub mod cache;
pub mod clock;
pub mod host;
pub mod models;
pub mod monitor;
pub mod sensing;
pub mod session;
pub mod settings;
pub mod sync;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

pub use cache::{CacheError, DurableCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use host::{apply_event, HostEvent};
pub use models::{Ledger, PauseReason, SessionRecord};
pub use sensing::{
    CommandForegroundDetector, ForegroundAppDetector, NoopForegroundDetector, NoopTaskLookup,
    SensingController, TaskLookup,
};
pub use session::{HostSignal, ManagerConfig, SessionManager};
pub use settings::{resolve_data_dir, SettingsStore, TrackerSettings};
pub use sync::{
    HttpRemoteStore, NoopRemoteStore, RemoteSessionRecord, RemoteStore, RetryPolicy, SyncEngine,
    SyncError, SyncOutcome,
};
pub use utils::logging::init_logging;

fn build_remote(settings: &TrackerSettings) -> Result<Arc<dyn RemoteStore>> {
    match settings.remote_url.as_deref() {
        Some(url) => {
            let store = HttpRemoteStore::new(url.to_string(), settings.remote_timeout())
                .context("failed to build HTTP client for remote store")?;
            info!("Syncing sessions to {}", store.endpoint());
            Ok(Arc::new(store))
        }
        None => {
            warn!("No remote URL configured; sessions stay local until one is set");
            Ok(Arc::new(NoopRemoteStore))
        }
    }
}

fn build_detector(settings: &TrackerSettings) -> Arc<dyn ForegroundAppDetector> {
    match settings
        .foreground_command
        .as_deref()
        .and_then(CommandForegroundDetector::from_argv)
    {
        Some(detector) => Arc::new(detector),
        None => {
            info!("No foreground command configured; relying on host start/end events");
            Arc::new(NoopForegroundDetector)
        }
    }
}

/// Entry point for the binary: wires the tracker to the local data
/// directory and drives it from host events on stdin until exit.
pub fn run() -> Result<()> {
    init_logging();
    info!("Activity tracker starting up...");

    // Single-threaded: all ledger mutation happens on one event loop.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(run_tracker())
}

async fn run_tracker() -> Result<()> {
    let data_dir = resolve_data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let settings_store = SettingsStore::in_dir(&data_dir)?;
    let settings = settings_store.settings().with_env_overrides();

    let manager = SessionManager::new(
        ManagerConfig::from(&settings),
        DurableCache::in_dir(&data_dir),
        build_remote(&settings)?,
        Arc::new(SystemClock),
    );
    manager.initialize().await;

    let mut sensing = SensingController::new();
    sensing.start_sensing(
        manager.clone(),
        build_detector(&settings),
        Arc::new(NoopTaskLookup),
        settings.poll_interval(),
    )?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut destroyed = false;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read host events")? else {
                    info!("Host event stream closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let event = match line.parse::<HostEvent>() {
                    Ok(event) => event,
                    Err(err) => {
                        warn!("{err:#}");
                        continue;
                    }
                };
                if let Err(err) = apply_event(&manager, &event).await {
                    error!("Failed to handle '{line}': {err:#}");
                }
                if event.is_terminal() {
                    destroyed = matches!(event, HostEvent::Destroy);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    sensing.stop_sensing().await?;
    if !destroyed {
        manager.shutdown().await?;
    }
    info!("Activity tracker stopped");
    Ok(())
}
