use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{CacheError, DurableCache},
    clock::Clock,
    models::{normalize_app_name, Ledger, PauseReason, SessionRecord},
    monitor::{ActivityEffect, ConnectivityChange, ConnectivityMonitor, IdleMonitor},
    settings::TrackerSettings,
    sync::{RemoteStore, RetryPolicy, SyncEngine, SyncOutcome},
};

use super::HostSignal;

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub idle_threshold: Duration,
    pub idle_check_interval: Duration,
    pub sync_interval: Duration,
    pub retry: RetryPolicy,
    pub initially_online: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&TrackerSettings::default())
    }
}

impl From<&TrackerSettings> for ManagerConfig {
    fn from(settings: &TrackerSettings) -> Self {
        Self {
            idle_threshold: settings.idle_threshold(),
            idle_check_interval: settings.idle_check_interval(),
            sync_interval: settings.sync_interval(),
            retry: RetryPolicy {
                base_delay: settings.retry_base(),
                max_retries: settings.max_retries,
            },
            initially_online: settings.initially_online,
        }
    }
}

/// Orchestrates session tracking: owns the ledger, reacts to idle,
/// connectivity and host lifecycle events, and drives persistence and sync.
#[derive(Clone)]
pub struct SessionManager {
    ledger: Arc<Mutex<Ledger>>,
    idle: Arc<Mutex<IdleMonitor>>,
    connectivity: Arc<ConnectivityMonitor>,
    cache: DurableCache,
    sync: SyncEngine,
    clock: Arc<dyn Clock>,
    config: ManagerConfig,
    tickers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    cancel_token: Arc<Mutex<Option<CancellationToken>>>,
}

impl SessionManager {
    pub fn new(
        config: ManagerConfig,
        cache: DurableCache,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = Arc::new(Mutex::new(Ledger::default()));
        let connectivity = Arc::new(ConnectivityMonitor::new(config.initially_online));
        let idle_threshold = chrono::Duration::from_std(config.idle_threshold)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let idle = IdleMonitor::new(idle_threshold, clock.now());
        let sync = SyncEngine::new(
            ledger.clone(),
            cache.clone(),
            remote,
            clock.clone(),
            connectivity.subscribe(),
            config.retry,
        );

        Self {
            ledger,
            idle: Arc::new(Mutex::new(idle)),
            connectivity,
            cache,
            sync,
            clock,
            config,
            tickers: Arc::new(Mutex::new(Vec::new())),
            cancel_token: Arc::new(Mutex::new(None)),
        }
    }

    /// Loads the cached ledger, kicks off a sync if it was left dirty, and
    /// starts the idle checker and the periodic flush+sync timer.
    pub async fn initialize(&self) {
        let loaded = self.cache.load().await;
        let dirty = loaded.unsynced_changes;
        if let Some(current) = loaded.current() {
            info!(
                "Resuming current session {} for {} from cache",
                current.id, current.app_name
            );
        }
        *self.ledger.lock().await = loaded;
        self.idle.lock().await.record_activity(self.clock.now());

        if dirty {
            let sync = self.sync.clone();
            tokio::spawn(async move {
                let outcome = sync.sync_pending().await;
                debug!("Startup sync finished: {outcome:?}");
            });
        }

        self.spawn_tickers().await;
    }

    pub async fn start_session(&self, app_name: &str, task_id: Option<i64>) -> Option<SessionRecord> {
        let Some(app_name) = normalize_app_name(app_name) else {
            debug!("start_session ignored: empty app name");
            return None;
        };

        let mut ledger = self.ledger.lock().await;
        let previous = ledger.current().map(|record| record.id.clone());
        let record = ledger.start_session(&app_name, task_id, self.clock.now())?;
        if previous.as_deref() != Some(record.id.as_str()) {
            info!("Started session {} for {}", record.id, record.app_name);
        }
        Some(record)
    }

    pub async fn end_session(&self) -> Option<SessionRecord> {
        let ended = self.ledger.lock().await.end_session(self.clock.now());
        match &ended {
            Some(record) => info!(
                "Ended session {} for {} ({} ms)",
                record.id,
                record.app_name,
                record.duration_ms.unwrap_or(0)
            ),
            None => debug!("end_session ignored: no current session"),
        }
        ended
    }

    /// Explicit pause. Monitors never resume a manually paused session.
    pub async fn pause_tracking(&self) -> bool {
        self.pause_for(PauseReason::Manual).await
    }

    /// Explicit resume; lifts a pause of any kind.
    pub async fn resume_tracking(&self) -> bool {
        let resumed = self.ledger.lock().await.resume(self.clock.now());
        if resumed {
            self.idle.lock().await.record_activity(self.clock.now());
        } else {
            debug!("resume_tracking ignored: nothing paused");
        }
        resumed
    }

    async fn pause_for(&self, reason: PauseReason) -> bool {
        let paused = self.ledger.lock().await.pause(reason, self.clock.now());
        if paused {
            info!("Tracking paused ({})", reason.as_str());
        } else {
            debug!("pause ({}) ignored: nothing running", reason.as_str());
        }
        paused
    }

    async fn resume_for(&self, reason: PauseReason) -> bool {
        let resumed = self
            .ledger
            .lock()
            .await
            .resume_if_paused_by(reason, self.clock.now());
        if resumed {
            info!("Tracking resumed ({})", reason.as_str());
        }
        resumed
    }

    async fn apply_activity_effect(&self, effect: Option<ActivityEffect>) {
        match effect {
            Some(ActivityEffect::Pause) => {
                self.pause_for(PauseReason::Idle).await;
            }
            Some(ActivityEffect::Resume) => {
                self.resume_for(PauseReason::Idle).await;
            }
            None => {}
        }
    }

    /// Qualifying user input (keyboard, mouse, focus change).
    pub async fn record_activity(&self) {
        let effect = self.idle.lock().await.record_activity(self.clock.now());
        self.apply_activity_effect(effect).await;
    }

    /// One idle-timer tick.
    pub async fn check_idle(&self) {
        let effect = self.idle.lock().await.check(self.clock.now());
        self.apply_activity_effect(effect).await;
    }

    pub async fn handle_host_signal(&self, signal: HostSignal) {
        debug!("Host signal: {signal}");
        match signal {
            HostSignal::Exit | HostSignal::BeforeQuit => {
                if let Err(err) = self.persist().await {
                    error!("Failed to persist sessions on {signal}: {err}");
                }
            }
            HostSignal::Suspend | HostSignal::LockScreen => {
                self.pause_for(PauseReason::System).await;
            }
            HostSignal::Resume | HostSignal::UnlockScreen => {
                if self.resume_for(PauseReason::System).await {
                    self.idle.lock().await.record_activity(self.clock.now());
                }
            }
            HostSignal::VisibilityHidden => {
                let effect = self.idle.lock().await.visibility_hidden();
                self.apply_activity_effect(effect).await;
            }
            HostSignal::VisibilityVisible => {
                let effect = self.idle.lock().await.visibility_visible(self.clock.now());
                self.apply_activity_effect(effect).await;
            }
        }
    }

    /// Host connectivity event. Coming back online triggers an immediate
    /// flush and sync in the background.
    pub async fn set_online(&self, online: bool) -> ConnectivityChange {
        let change = self.connectivity.set_online(online);
        match change {
            ConnectivityChange::CameOnline => {
                info!("Connectivity restored; syncing pending sessions");
                let manager = self.clone();
                tokio::spawn(async move {
                    match manager.flush_to_disk().await {
                        Ok(outcome) => debug!("Reconnect sync finished: {outcome:?}"),
                        Err(err) => error!("Failed to persist sessions on reconnect: {err}"),
                    }
                });
            }
            ConnectivityChange::WentOffline => info!("Connectivity lost"),
            ConnectivityChange::Unchanged => {}
        }
        change
    }

    /// Writes the ledger if it is dirty. Sessions are left untouched.
    pub async fn persist(&self) -> Result<bool, CacheError> {
        // Held across the write so saves and post-sync rewrites land in order.
        let ledger = self.ledger.lock().await;
        self.cache.save(&ledger).await
    }

    /// Forces persistence, then makes a best-effort sync attempt.
    pub async fn flush_to_disk(&self) -> Result<SyncOutcome, CacheError> {
        self.persist().await?;
        Ok(self.sync.sync_pending().await)
    }

    pub async fn sync_pending(&self) -> SyncOutcome {
        self.sync.sync_pending().await
    }

    /// Stops timers and persists, keeping the current session open so it is
    /// picked up again on the next launch.
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        self.stop_tickers().await;
        self.sync.cancel_retry();
        self.persist().await.map(|_| ())
    }

    /// Ends the current session, stops timers and performs a final flush.
    pub async fn destroy(&self) -> Result<SyncOutcome, CacheError> {
        self.stop_tickers().await;
        self.end_session().await;
        let outcome = self.flush_to_disk().await;
        self.sync.cancel_retry();
        outcome
    }

    pub async fn get_current_session(&self) -> Option<SessionRecord> {
        self.ledger.lock().await.current().cloned()
    }

    pub async fn get_all_sessions(&self) -> Vec<SessionRecord> {
        self.ledger.lock().await.sessions.clone()
    }

    pub async fn has_unsynced_changes(&self) -> bool {
        self.ledger.lock().await.unsynced_changes
    }

    pub async fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.ledger.lock().await.last_sync
    }

    pub async fn is_idle(&self) -> bool {
        self.idle.lock().await.is_idle()
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn sync_engine(&self) -> &SyncEngine {
        &self.sync
    }

    async fn spawn_tickers(&self) {
        self.stop_tickers().await;

        let token = CancellationToken::new();
        *self.cancel_token.lock().await = Some(token.clone());

        let idle_handle = {
            let manager = self.clone();
            let token = token.clone();
            let period = self.config.idle_check_interval;
            tokio::spawn(async move {
                let mut ticker = time::interval_at(time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => manager.check_idle().await,
                        _ = token.cancelled() => break,
                    }
                }
            })
        };

        let sync_handle = {
            let manager = self.clone();
            let token = token.clone();
            let period = self.config.sync_interval;
            tokio::spawn(async move {
                let mut ticker = time::interval_at(time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match manager.flush_to_disk().await {
                                Ok(outcome) => debug!("Periodic sync: {outcome:?}"),
                                Err(err) => warn!("Periodic save failed, will retry next tick: {err}"),
                            }
                        }
                        _ = token.cancelled() => break,
                    }
                }
            })
        };

        let mut tickers = self.tickers.lock().await;
        tickers.push(idle_handle);
        tickers.push(sync_handle);
    }

    async fn stop_tickers(&self) {
        if let Some(token) = self.cancel_token.lock().await.take() {
            token.cancel();
        }
        let handles: Vec<JoinHandle<()>> = self.tickers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!("Ticker task failed to join: {err}");
                }
            }
        }
    }
}
