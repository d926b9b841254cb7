//! Pure state transitions over the [`Ledger`]. Nothing here performs I/O or
//! reads the clock; callers pass `now` explicitly.

use chrono::{DateTime, Utc};

use crate::models::{Ledger, PauseReason, SessionRecord};

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

impl Ledger {
    /// Index of the open ("current") session, if any.
    pub fn current_index(&self) -> Option<usize> {
        self.sessions.iter().rposition(SessionRecord::is_open)
    }

    pub fn current(&self) -> Option<&SessionRecord> {
        self.current_index().map(|idx| &self.sessions[idx])
    }

    fn current_mut(&mut self) -> Option<&mut SessionRecord> {
        let idx = self.current_index()?;
        Some(&mut self.sessions[idx])
    }

    /// Starts (or re-activates) the session for `app_name`.
    ///
    /// A current session for the same app is returned as-is, folding any
    /// in-progress pause. A current session for another app is ended first.
    /// Returns `None` for an empty app name.
    pub fn start_session(
        &mut self,
        app_name: &str,
        task_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Option<SessionRecord> {
        let app_name = app_name.trim();
        if app_name.is_empty() {
            return None;
        }

        if let Some(idx) = self.current_index() {
            if self.sessions[idx].app_name == app_name {
                if !self.sessions[idx].is_active {
                    fold_pause(&mut self.sessions[idx], now);
                    self.sessions[idx].is_active = true;
                    self.unsynced_changes = true;
                }
                return Some(self.sessions[idx].clone());
            }
            self.end_session(now);
        }

        let record = SessionRecord::new(app_name.to_string(), task_id, now);
        self.sessions.push(record.clone());
        self.unsynced_changes = true;
        Some(record)
    }

    /// Ends the current session and returns a snapshot of the ended record.
    pub fn end_session(&mut self, now: DateTime<Utc>) -> Option<SessionRecord> {
        let record = self.current_mut()?;

        fold_pause(record, now);
        let total_duration = elapsed_ms(record.start_time, now);
        record.end_time = Some(now);
        record.is_active = false;
        record.duration_ms = Some(total_duration.saturating_sub(record.total_paused_time));

        let snapshot = record.clone();
        self.unsynced_changes = true;
        Some(snapshot)
    }

    /// Pauses the current session. Returns `false` when there is nothing
    /// running to pause (no current session, or already paused).
    pub fn pause(&mut self, reason: PauseReason, now: DateTime<Utc>) -> bool {
        let Some(record) = self.current_mut() else {
            return false;
        };
        if record.is_paused() || !record.is_active {
            return false;
        }

        record.is_active = false;
        record.paused_at = Some(now);
        record.pause_reason = Some(reason);
        self.unsynced_changes = true;
        true
    }

    /// Resumes the current session regardless of why it was paused.
    pub fn resume(&mut self, now: DateTime<Utc>) -> bool {
        let Some(record) = self.current_mut() else {
            return false;
        };
        if !record.is_paused() {
            return false;
        }

        fold_pause(record, now);
        record.is_active = true;
        self.unsynced_changes = true;
        true
    }

    /// Resumes only when the in-progress pause was caused by `reason`.
    pub fn resume_if_paused_by(&mut self, reason: PauseReason, now: DateTime<Utc>) -> bool {
        if self.paused_by() != Some(reason) {
            return false;
        }
        self.resume(now)
    }

    pub fn paused_by(&self) -> Option<PauseReason> {
        self.current()
            .filter(|record| record.is_paused())
            .and_then(|record| record.pause_reason)
    }

    /// Ended records not yet accepted by the remote store.
    pub fn pending_sync(&self) -> Vec<SessionRecord> {
        self.sessions
            .iter()
            .filter(|record| record.is_pending_sync())
            .cloned()
            .collect()
    }

    /// Flags the given records as synced and recomputes the dirty flag.
    /// An open session always keeps the ledger dirty.
    pub fn mark_synced(&mut self, ids: &[String], now: DateTime<Utc>) {
        for record in self
            .sessions
            .iter_mut()
            .filter(|record| ids.iter().any(|id| *id == record.id))
        {
            record.synced = true;
        }
        self.last_sync = Some(now);
        self.unsynced_changes = self.sessions.iter().any(|record| !record.synced);
    }

    /// Copy of the ledger without the records the remote store has already
    /// accepted. Once everything is drained only the open session remains.
    pub fn retain_unsynced(&self) -> Ledger {
        Ledger {
            sessions: self
                .sessions
                .iter()
                .filter(|record| !record.synced || record.is_open())
                .cloned()
                .collect(),
            last_sync: self.last_sync,
            unsynced_changes: self.unsynced_changes,
        }
    }
}

/// Moves an in-progress pause into `total_paused_time`.
fn fold_pause(record: &mut SessionRecord, now: DateTime<Utc>) {
    if let Some(paused_at) = record.paused_at.take() {
        record.total_paused_time = record
            .total_paused_time
            .saturating_add(elapsed_ms(paused_at, now));
    }
    record.pause_reason = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn open_count(ledger: &Ledger) -> usize {
        ledger
            .sessions
            .iter()
            .filter(|record| record.is_active && record.end_time.is_none())
            .count()
    }

    #[test]
    fn test_start_rejects_empty_app_name() {
        let mut ledger = Ledger::default();
        assert!(ledger.start_session("  ", None, at(0)).is_none());
        assert!(ledger.sessions.is_empty());
        assert!(!ledger.unsynced_changes);
    }

    #[test]
    fn test_restart_same_app_is_idempotent() {
        let mut ledger = Ledger::default();
        let first = ledger.start_session("Editor", Some(1), at(0)).unwrap();
        let second = ledger.start_session("Editor", Some(1), at(5_000)).unwrap();

        assert_eq!(ledger.sessions.len(), 1);
        assert_eq!(first.id, second.id);
        assert_eq!(second.start_time, at(0));
    }

    #[test]
    fn test_switching_apps_ends_previous_session() {
        let mut ledger = Ledger::default();
        ledger.start_session("Editor", None, at(0)).unwrap();
        ledger.start_session("Browser", None, at(12_000)).unwrap();

        assert_eq!(ledger.sessions.len(), 2);
        assert_eq!(open_count(&ledger), 1);
        let ended = &ledger.sessions[0];
        assert_eq!(ended.end_time, Some(at(12_000)));
        assert_eq!(ended.duration_ms, Some(12_000));
        assert!(!ended.is_active);
        assert_eq!(ledger.current().unwrap().app_name, "Browser");
    }

    #[test]
    fn test_at_most_one_current_session() {
        let mut ledger = Ledger::default();
        for (step, app) in ["A", "B", "A", "A", "C", "B"].iter().enumerate() {
            ledger.start_session(app, None, at(step as i64 * 1_000));
            assert!(open_count(&ledger) <= 1);
        }
        assert_eq!(ledger.sessions.len(), 5);
    }

    #[test]
    fn test_end_without_current_session_returns_none() {
        let mut ledger = Ledger::default();
        assert!(ledger.end_session(at(0)).is_none());
        assert!(!ledger.unsynced_changes);
    }

    #[test]
    fn test_pause_resume_conservation() {
        let mut ledger = Ledger::default();
        ledger.start_session("Editor", Some(42), at(0));

        assert!(ledger.pause(PauseReason::Idle, at(10_000)));
        assert!(ledger.resume(at(40_000)));
        assert!(ledger.pause(PauseReason::System, at(50_000)));
        assert!(ledger.resume(at(55_000)));

        let ended = ledger.end_session(at(100_000)).unwrap();
        assert_eq!(ended.total_paused_time, 35_000);
        assert_eq!(ended.duration_ms, Some(65_000));
        assert_eq!(ended.start_time, at(0));
    }

    #[test]
    fn test_end_while_paused_folds_pause() {
        let mut ledger = Ledger::default();
        ledger.start_session("Editor", None, at(0));
        ledger.pause(PauseReason::Idle, at(20_000));

        let ended = ledger.end_session(at(50_000)).unwrap();
        assert_eq!(ended.total_paused_time, 30_000);
        assert_eq!(ended.duration_ms, Some(20_000));
        assert!(ended.paused_at.is_none());
        assert!(ended.pause_reason.is_none());
    }

    #[test]
    fn test_end_returns_snapshot_not_reference() {
        let mut ledger = Ledger::default();
        ledger.start_session("Editor", None, at(0));
        let mut snapshot = ledger.end_session(at(1_000)).unwrap();
        snapshot.app_name = "Mutated".into();
        assert_eq!(ledger.sessions[0].app_name, "Editor");
    }

    #[test]
    fn test_double_pause_is_rejected() {
        let mut ledger = Ledger::default();
        ledger.start_session("Editor", None, at(0));
        assert!(ledger.pause(PauseReason::Manual, at(1_000)));
        assert!(!ledger.pause(PauseReason::Idle, at(2_000)));
        assert_eq!(ledger.paused_by(), Some(PauseReason::Manual));
    }

    #[test]
    fn test_resume_if_paused_by_respects_reason() {
        let mut ledger = Ledger::default();
        ledger.start_session("Editor", None, at(0));
        ledger.pause(PauseReason::Manual, at(1_000));

        assert!(!ledger.resume_if_paused_by(PauseReason::Idle, at(2_000)));
        assert!(!ledger.resume_if_paused_by(PauseReason::System, at(2_000)));
        assert!(ledger.current().unwrap().is_paused());
        assert!(ledger.resume(at(3_000)));
        assert_eq!(ledger.current().unwrap().total_paused_time, 2_000);
    }

    #[test]
    fn test_restart_same_app_while_paused_reactivates() {
        let mut ledger = Ledger::default();
        ledger.start_session("Editor", None, at(0));
        ledger.pause(PauseReason::Idle, at(1_000));

        let record = ledger.start_session("Editor", None, at(4_000)).unwrap();
        assert!(record.is_active);
        assert!(!record.is_paused());
        assert_eq!(record.total_paused_time, 3_000);
        assert_eq!(ledger.sessions.len(), 1);
    }

    #[test]
    fn test_mark_synced_keeps_dirty_while_session_open() {
        let mut ledger = Ledger::default();
        ledger.start_session("Editor", None, at(0));
        ledger.start_session("Browser", None, at(1_000));

        let pending = ledger.pending_sync();
        assert_eq!(pending.len(), 1);
        let ids: Vec<String> = pending.iter().map(|r| r.id.clone()).collect();
        ledger.mark_synced(&ids, at(2_000));

        assert!(ledger.sessions[0].synced);
        assert!(ledger.unsynced_changes);
        assert_eq!(ledger.last_sync, Some(at(2_000)));

        ledger.end_session(at(3_000));
        let ids: Vec<String> = ledger.pending_sync().iter().map(|r| r.id.clone()).collect();
        ledger.mark_synced(&ids, at(4_000));
        assert!(!ledger.unsynced_changes);
    }

    #[test]
    fn test_restart_same_app_lifts_manual_pause() {
        let mut ledger = Ledger::default();
        ledger.start_session("Editor", None, at(0));
        ledger.pause(PauseReason::Manual, at(1_000));

        let record = ledger.start_session("Editor", None, at(6_000)).unwrap();
        assert!(record.is_active);
        assert!(record.pause_reason.is_none());
        assert_eq!(record.total_paused_time, 5_000);
    }

    #[test]
    fn test_retain_unsynced_drops_only_accepted_records() {
        let mut ledger = Ledger::default();
        ledger.start_session("Editor", None, at(0));
        ledger.start_session("Browser", None, at(1_000));
        let ids: Vec<String> = ledger.pending_sync().iter().map(|r| r.id.clone()).collect();
        ledger.mark_synced(&ids, at(1_500));

        // Ended after the sync went out, so still owed to the remote store.
        ledger.start_session("Terminal", None, at(2_000));

        let retained = ledger.retain_unsynced();
        let kept: Vec<&str> = retained
            .sessions
            .iter()
            .map(|r| r.app_name.as_str())
            .collect();
        assert_eq!(kept, ["Browser", "Terminal"]);

        let ids: Vec<String> = ledger.pending_sync().iter().map(|r| r.id.clone()).collect();
        ledger.mark_synced(&ids, at(3_000));
        let pruned = ledger.retain_unsynced();
        assert_eq!(pruned.sessions.len(), 1);
        assert_eq!(pruned.sessions[0].app_name, "Terminal");

        ledger.end_session(at(4_000));
        let ids: Vec<String> = ledger.pending_sync().iter().map(|r| r.id.clone()).collect();
        ledger.mark_synced(&ids, at(5_000));
        assert!(ledger.retain_unsynced().sessions.is_empty());
        assert_eq!(ledger.sessions.len(), 3);
    }
}
