use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex as StdMutex, MutexGuard},
    time::Duration,
};

use tokio::{
    sync::{watch, Mutex, MutexGuard as InFlightGuard},
    task::JoinHandle,
    time,
};

use crate::{
    cache::DurableCache,
    clock::Clock,
    models::Ledger,
    sync::remote::{RemoteSessionRecord, RemoteStore, SyncError},
};

// Set to false to silence routine sync logging.
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    /// Retries allowed after the initial attempt before a cycle is abandoned.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// `base * 2^(attempt-1)` for the 1-based failed attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another cycle is already talking to the remote store.
    InFlight,
    Offline,
    Clean,
    /// Only the open session is dirty; nothing is eligible yet.
    NothingEnded,
    Synced(usize),
    RetryScheduled { attempt: u32, delay: Duration },
    Abandoned { attempts: u32 },
}

#[derive(Default)]
struct RetryState {
    attempts: u32,
    timer: Option<JoinHandle<()>>,
}

/// Drains ended, unsynced records to the remote store in single batches with
/// bounded exponential-backoff retry.
#[derive(Clone)]
pub struct SyncEngine {
    ledger: Arc<Mutex<Ledger>>,
    cache: DurableCache,
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    online: watch::Receiver<bool>,
    policy: RetryPolicy,
    retry: Arc<StdMutex<RetryState>>,
    in_flight: Arc<Mutex<()>>,
}

impl SyncEngine {
    pub fn new(
        ledger: Arc<Mutex<Ledger>>,
        cache: DurableCache,
        remote: Arc<dyn RemoteStore>,
        clock: Arc<dyn Clock>,
        online: watch::Receiver<bool>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            ledger,
            cache,
            remote,
            clock,
            online,
            policy,
            retry: Arc::new(StdMutex::new(RetryState::default())),
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Fresh sync cycle: cancels any pending retry and resets the attempt
    /// counter before running. A cycle already talking to the remote store
    /// (fresh or retry) is left alone and `InFlight` is returned.
    pub async fn sync_pending(&self) -> SyncOutcome {
        let Ok(in_flight) = self.in_flight.try_lock() else {
            log_info!("Sync already in flight; skipping");
            return SyncOutcome::InFlight;
        };
        {
            let mut retry = self.retry_state();
            if let Some(timer) = retry.timer.take() {
                timer.abort();
            }
            retry.attempts = 0;
        }
        self.run_cycle(in_flight).await
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_state().attempts
    }

    pub fn has_pending_retry(&self) -> bool {
        self.retry_state().timer.is_some()
    }

    /// Drops any scheduled retry without touching the ledger.
    pub fn cancel_retry(&self) {
        let mut retry = self.retry_state();
        if let Some(timer) = retry.timer.take() {
            timer.abort();
        }
        retry.attempts = 0;
    }

    async fn run_cycle(&self, _in_flight: InFlightGuard<'_, ()>) -> SyncOutcome {
        let pending = {
            let mut ledger = self.ledger.lock().await;
            if !ledger.unsynced_changes {
                self.reset_attempts();
                return SyncOutcome::Clean;
            }
            if !*self.online.borrow() {
                self.reset_attempts();
                return SyncOutcome::Offline;
            }
            let pending = ledger.pending_sync();
            if pending.is_empty() {
                // The open session is the only dirty state. It has to reach
                // disk before the flag drops, or a later save skips it.
                if let Err(err) = self.cache.save(&ledger).await {
                    log_error!("Failed to persist open session: {err}");
                } else {
                    ledger.unsynced_changes = false;
                }
                self.reset_attempts();
                return SyncOutcome::NothingEnded;
            }
            pending
        };

        let batch = match pending
            .iter()
            .map(RemoteSessionRecord::try_from)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(batch) => batch,
            Err(err) => return self.handle_failure(err),
        };

        match self.remote.submit(&batch).await {
            Ok(()) => {
                let ids: Vec<String> = batch.into_iter().map(|record| record.session_id).collect();
                // Records that ended while the request was out stay unsynced
                // and are kept by the rewrite.
                let mut ledger = self.ledger.lock().await;
                ledger.mark_synced(&ids, self.clock.now());
                if let Err(err) = self.cache.rewrite(&ledger).await {
                    log_error!("Failed to rewrite cache after sync: {err}");
                }
                drop(ledger);
                self.reset_attempts();
                log_info!("Synced {} sessions", ids.len());
                SyncOutcome::Synced(ids.len())
            }
            Err(err) => self.handle_failure(err),
        }
    }

    fn handle_failure(&self, err: SyncError) -> SyncOutcome {
        let mut retry = self.retry_state();
        retry.attempts += 1;
        let attempt = retry.attempts;

        if attempt > self.policy.max_retries {
            log_warn!(
                "Sync failed after {} retries ({err}); waiting for the next trigger",
                self.policy.max_retries
            );
            retry.attempts = 0;
            return SyncOutcome::Abandoned { attempts: attempt };
        }

        let delay = self.policy.delay_for(attempt);
        log_warn!("Sync attempt {attempt} failed ({err}); retrying in {delay:?}");

        if let Some(previous) = retry.timer.take() {
            previous.abort();
        }
        let engine = self.clone();
        retry.timer = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            // Detach before running so a fresh sync cannot abort this cycle
            // mid-request.
            engine.retry_state().timer.take();
            engine.retry_cycle().await;
        }));

        SyncOutcome::RetryScheduled { attempt, delay }
    }

    fn retry_cycle(self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            match self.in_flight.try_lock() {
                Ok(in_flight) => {
                    self.run_cycle(in_flight).await;
                }
                Err(_) => {
                    log_info!("Retry skipped; a fresh sync is already in flight");
                }
            }
        })
    }

    fn reset_attempts(&self) {
        self.retry_state().attempts = 0;
    }

    fn retry_state(&self) -> MutexGuard<'_, RetryState> {
        match self.retry.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, sync::remote::NoopRemoteStore};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;
    use tokio::sync::Notify;

    /// Fails the first `failures` submissions, then accepts.
    struct ScriptedRemote {
        failures: usize,
        calls: AtomicUsize,
        batches: StdMutex<Vec<Vec<RemoteSessionRecord>>>,
    }

    impl ScriptedRemote {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
                batches: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteStore for ScriptedRemote {
        async fn submit(&self, batch: &[RemoteSessionRecord]) -> Result<(), SyncError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(SyncError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            self.batches.lock().unwrap().push(batch.to_vec());
            Ok(())
        }
    }

    /// Holds every submission until released, then answers with `fail`.
    #[derive(Default)]
    struct GatedRemote {
        fail: bool,
        calls: AtomicUsize,
        release: Notify,
    }

    impl GatedRemote {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteStore for GatedRemote {
        async fn submit(&self, _batch: &[RemoteSessionRecord]) -> Result<(), SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            if self.fail {
                return Err(SyncError::Status {
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(())
        }
    }

    /// Switches the foreground app while its request is out, ending the
    /// session that was current when the batch was taken.
    struct SwitchingRemote {
        ledger: Arc<Mutex<Ledger>>,
    }

    #[async_trait]
    impl RemoteStore for SwitchingRemote {
        async fn submit(&self, _batch: &[RemoteSessionRecord]) -> Result<(), SyncError> {
            let mut ledger = self.ledger.lock().await;
            let now = Utc.timestamp_millis_opt(1_700_000_120_000).unwrap();
            ledger.start_session("Terminal", None, now);
            Ok(())
        }
    }

    struct Fixture {
        engine: SyncEngine,
        ledger: Arc<Mutex<Ledger>>,
        cache: DurableCache,
        online_tx: watch::Sender<bool>,
        _dir: tempfile::TempDir,
    }

    fn fixture(remote: Arc<dyn RemoteStore>) -> Fixture {
        fixture_with(Arc::new(Mutex::new(Ledger::default())), remote)
    }

    fn fixture_with(ledger: Arc<Mutex<Ledger>>, remote: Arc<dyn RemoteStore>) -> Fixture {
        let dir = tempdir().unwrap();
        let cache = DurableCache::in_dir(dir.path());
        let clock = Arc::new(ManualClock::new(
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        ));
        let (online_tx, online_rx) = watch::channel(true);
        let engine = SyncEngine::new(
            ledger.clone(),
            cache.clone(),
            remote,
            clock,
            online_rx,
            RetryPolicy::default(),
        );
        Fixture {
            engine,
            ledger,
            cache,
            online_tx,
            _dir: dir,
        }
    }

    async fn seed_ended_and_open(ledger: &Arc<Mutex<Ledger>>) {
        let mut guard = ledger.lock().await;
        let t0 = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        guard.start_session("Editor", Some(42), t0);
        guard.start_session("Browser", None, t0 + chrono::Duration::seconds(60));
    }

    #[test]
    fn test_backoff_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for(3), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn test_clean_ledger_is_noop() {
        let remote = ScriptedRemote::new(0);
        let fx = fixture(remote.clone());

        assert_eq!(fx.engine.sync_pending().await, SyncOutcome::Clean);
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test]
    async fn test_offline_is_noop() {
        let remote = ScriptedRemote::new(0);
        let fx = fixture(remote.clone());
        seed_ended_and_open(&fx.ledger).await;
        fx.online_tx.send(false).unwrap();

        assert_eq!(fx.engine.sync_pending().await, SyncOutcome::Offline);
        assert_eq!(remote.calls(), 0);
        assert!(fx.ledger.lock().await.unsynced_changes);
    }

    #[tokio::test]
    async fn test_only_open_session_is_persisted_then_flag_cleared() {
        let remote = ScriptedRemote::new(0);
        let fx = fixture(remote.clone());
        fx.ledger.lock().await.start_session(
            "Editor",
            None,
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        );

        assert_eq!(fx.engine.sync_pending().await, SyncOutcome::NothingEnded);
        assert!(!fx.ledger.lock().await.unsynced_changes);
        assert_eq!(remote.calls(), 0);

        let on_disk = fx.cache.load().await;
        assert_eq!(on_disk.current().unwrap().app_name, "Editor");
    }

    #[tokio::test]
    async fn test_records_ended_during_request_stay_on_disk() {
        let ledger = Arc::new(Mutex::new(Ledger::default()));
        let remote = Arc::new(SwitchingRemote {
            ledger: ledger.clone(),
        });
        let fx = fixture_with(ledger, remote);
        seed_ended_and_open(&fx.ledger).await;

        assert_eq!(fx.engine.sync_pending().await, SyncOutcome::Synced(1));

        let on_disk: Vec<(String, bool)> = fx
            .cache
            .load()
            .await
            .sessions
            .into_iter()
            .map(|record| (record.app_name, record.synced))
            .collect();
        assert_eq!(
            on_disk,
            [("Browser".to_string(), false), ("Terminal".to_string(), false)]
        );
        assert!(fx.ledger.lock().await.unsynced_changes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_sync_reports_in_flight() {
        let remote = Arc::new(GatedRemote::default());
        let fx = fixture(remote.clone());
        seed_ended_and_open(&fx.ledger).await;

        let engine = fx.engine.clone();
        let first = tokio::spawn(async move { engine.sync_pending().await });
        while remote.calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(fx.engine.sync_pending().await, SyncOutcome::InFlight);
        remote.release.notify_one();
        assert_eq!(first.await.unwrap(), SyncOutcome::Synced(1));
        assert_eq!(remote.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_sync_leaves_running_retry_counter_alone() {
        let remote = Arc::new(GatedRemote {
            fail: true,
            ..GatedRemote::default()
        });
        let fx = fixture(remote.clone());
        seed_ended_and_open(&fx.ledger).await;

        let engine = fx.engine.clone();
        let first = tokio::spawn(async move { engine.sync_pending().await });
        while remote.calls() == 0 {
            tokio::task::yield_now().await;
        }
        remote.release.notify_one();
        assert_eq!(
            first.await.unwrap(),
            SyncOutcome::RetryScheduled {
                attempt: 1,
                delay: Duration::from_secs(30)
            }
        );

        // The first retry fires and blocks on the remote store.
        time::sleep(Duration::from_secs(31)).await;
        assert_eq!(remote.calls(), 2);

        assert_eq!(fx.engine.sync_pending().await, SyncOutcome::InFlight);
        assert_eq!(fx.engine.retry_attempts(), 1);

        remote.release.notify_one();
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fx.engine.retry_attempts(), 2);
        assert!(fx.engine.has_pending_retry());
        assert_eq!(remote.calls(), 2);
        fx.engine.cancel_retry();
    }

    #[tokio::test]
    async fn test_success_marks_synced_and_prunes_cache() {
        let remote = ScriptedRemote::new(0);
        let fx = fixture(remote.clone());
        seed_ended_and_open(&fx.ledger).await;

        assert_eq!(fx.engine.sync_pending().await, SyncOutcome::Synced(1));

        let ledger = fx.ledger.lock().await;
        assert!(ledger.sessions[0].synced);
        assert!(!ledger.sessions[1].synced);
        assert!(ledger.unsynced_changes);
        assert!(ledger.last_sync.is_some());
        drop(ledger);

        let batches = remote.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].app_name, "Editor");
        assert_eq!(batches[0][0].duration_ms, 60_000);

        let on_disk = fx.cache.load().await;
        assert_eq!(on_disk.sessions.len(), 1);
        assert_eq!(on_disk.sessions[0].app_name, "Browser");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded_and_keep_dirty() {
        let remote = ScriptedRemote::new(usize::MAX);
        let fx = fixture(remote.clone());
        seed_ended_and_open(&fx.ledger).await;

        assert_eq!(
            fx.engine.sync_pending().await,
            SyncOutcome::RetryScheduled {
                attempt: 1,
                delay: Duration::from_secs(30)
            }
        );

        time::sleep(Duration::from_secs(30 + 60 + 120 + 600)).await;

        assert_eq!(remote.calls(), 1 + 3);
        assert_eq!(fx.engine.retry_attempts(), 0);
        assert!(!fx.engine.has_pending_retry());
        let ledger = fx.ledger.lock().await;
        assert!(ledger.unsynced_changes);
        assert!(!ledger.sessions[0].synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failure() {
        let remote = ScriptedRemote::new(1);
        let fx = fixture(remote.clone());
        seed_ended_and_open(&fx.ledger).await;

        fx.engine.sync_pending().await;
        time::sleep(Duration::from_secs(31)).await;

        assert_eq!(remote.calls(), 2);
        assert!(fx.ledger.lock().await.sessions[0].synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_sync_cancels_pending_retry() {
        let remote = ScriptedRemote::new(2);
        let fx = fixture(remote.clone());
        seed_ended_and_open(&fx.ledger).await;

        fx.engine.sync_pending().await;
        assert!(fx.engine.has_pending_retry());

        // Second failure restarts the chain at attempt 1 instead of 2.
        assert_eq!(
            fx.engine.sync_pending().await,
            SyncOutcome::RetryScheduled {
                attempt: 1,
                delay: Duration::from_secs(30)
            }
        );

        time::sleep(Duration::from_secs(31)).await;
        assert_eq!(remote.calls(), 3);
        assert!(fx.ledger.lock().await.sessions[0].synced);
    }

    #[tokio::test]
    async fn test_unconfigured_remote_keeps_records() {
        let fx = fixture(Arc::new(NoopRemoteStore));
        seed_ended_and_open(&fx.ledger).await;

        let outcome = fx.engine.sync_pending().await;
        assert!(matches!(outcome, SyncOutcome::RetryScheduled { attempt: 1, .. }));
        fx.engine.cancel_retry();
        assert!(fx.ledger.lock().await.unsynced_changes);
    }
}
