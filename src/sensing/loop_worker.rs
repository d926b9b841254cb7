use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{models::normalize_app_name, session::SessionManager};

use super::detector::{ForegroundAppDetector, TaskLookup};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const DETECT_TIMEOUT_SECS: u64 = 5;

/// Polls the foreground app and hands changes to the session manager.
pub async fn sensing_loop(
    manager: SessionManager,
    detector: Arc<dyn ForegroundAppDetector>,
    tasks: Arc<dyn TaskLookup>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_app: Option<String> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(current) = detect(detector.as_ref()).await else {
                    continue;
                };
                if current == last_app {
                    continue;
                }
                apply_change(&manager, tasks.as_ref(), current.as_deref()).await;
                last_app = current;
            }
            _ = cancel_token.cancelled() => {
                log_info!("sensing loop shutting down");
                break;
            }
        }
    }
}

/// `None` when detection failed (the previous state is kept); `Some(None)`
/// when nothing is focused.
async fn detect(detector: &dyn ForegroundAppDetector) -> Option<Option<String>> {
    let fut = detector.foreground_app();
    match tokio::time::timeout(Duration::from_secs(DETECT_TIMEOUT_SECS), fut).await {
        Ok(Ok(raw)) => Some(raw.as_deref().and_then(normalize_app_name)),
        Ok(Err(err)) => {
            log_warn!("foreground detection failed: {err:?}");
            None
        }
        Err(_) => {
            log_warn!("foreground detection timeout (> {}s)", DETECT_TIMEOUT_SECS);
            None
        }
    }
}

pub(crate) async fn apply_change(
    manager: &SessionManager,
    tasks: &dyn TaskLookup,
    app_name: Option<&str>,
) {
    let Some(app_name) = app_name else {
        manager.end_session().await;
        return;
    };

    // A focus change is user input.
    manager.record_activity().await;

    let task_id = match tasks.find_task_id_for_app(app_name).await {
        Ok(task_id) => task_id,
        Err(err) => {
            log_warn!("task lookup failed for {app_name}: {err:?}; recording without task");
            None
        }
    };
    manager.start_session(app_name, task_id).await;
}
