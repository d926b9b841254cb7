//! Line-oriented host event protocol used by the binary: a host process (or
//! a person at a terminal) writes one event per line on stdin.
//!
//! ```text
//! start Editor 42     end          pause        resume-tracking
//! activity            online       offline      flush
//! status              destroy      suspend      unlock-screen ...
//! ```

use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Error, Result};
use log::info;

use crate::session::{HostSignal, SessionManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Signal(HostSignal),
    Connectivity(bool),
    Activity,
    Start { app_name: String, task_id: Option<i64> },
    End,
    Pause,
    Resume,
    Flush,
    Status,
    Destroy,
}

impl HostEvent {
    /// Whether the driver loop should stop after handling this event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HostEvent::Destroy | HostEvent::Signal(HostSignal::Exit | HostSignal::BeforeQuit)
        )
    }
}

impl FromStr for HostEvent {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            bail!("empty event");
        };

        let event = match command.to_ascii_lowercase().as_str() {
            "online" => HostEvent::Connectivity(true),
            "offline" => HostEvent::Connectivity(false),
            "activity" => HostEvent::Activity,
            "end" => HostEvent::End,
            "pause" => HostEvent::Pause,
            "resume-tracking" => HostEvent::Resume,
            "flush" => HostEvent::Flush,
            "status" => HostEvent::Status,
            "destroy" => HostEvent::Destroy,
            "start" => {
                let rest: Vec<&str> = parts.by_ref().collect();
                // A trailing integer is the task id; everything before it is
                // the app name, which may contain spaces.
                let (app_parts, task_id) = match rest.split_last() {
                    Some((last, init)) if !init.is_empty() => match last.parse::<i64>() {
                        Ok(id) => (init.to_vec(), Some(id)),
                        Err(_) => (rest.clone(), None),
                    },
                    _ => (rest.clone(), None),
                };
                let app_name = app_parts.join(" ");
                if app_name.is_empty() {
                    bail!("start requires an app name");
                }
                HostEvent::Start { app_name, task_id }
            }
            other => HostEvent::Signal(
                other
                    .parse::<HostSignal>()
                    .with_context(|| format!("unknown event '{line}'"))?,
            ),
        };

        if !matches!(event, HostEvent::Start { .. }) && parts.next().is_some() {
            return Err(anyhow!("unexpected arguments in '{line}'"));
        }
        Ok(event)
    }
}

/// Applies one event to the manager.
pub async fn apply_event(manager: &SessionManager, event: &HostEvent) -> Result<()> {
    match event {
        HostEvent::Signal(signal) => manager.handle_host_signal(*signal).await,
        HostEvent::Connectivity(online) => {
            manager.set_online(*online).await;
        }
        HostEvent::Activity => manager.record_activity().await,
        HostEvent::Start { app_name, task_id } => {
            manager.start_session(app_name, *task_id).await;
        }
        HostEvent::End => {
            manager.end_session().await;
        }
        HostEvent::Pause => {
            manager.pause_tracking().await;
        }
        HostEvent::Resume => {
            manager.resume_tracking().await;
        }
        HostEvent::Flush => {
            let outcome = manager.flush_to_disk().await?;
            info!("Flush complete: {outcome:?}");
        }
        HostEvent::Status => {
            let current = manager.get_current_session().await;
            let status = serde_json::json!({
                "current": current,
                "sessions": manager.get_all_sessions().await.len(),
                "unsyncedChanges": manager.has_unsynced_changes().await,
                "online": manager.is_online(),
                "idle": manager.is_idle().await,
                "lastSync": manager.last_sync().await.map(|at| at.to_rfc3339()),
            });
            println!("{status}");
        }
        HostEvent::Destroy => {
            let outcome = manager.destroy().await?;
            info!("Tracker destroyed: {outcome:?}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_events() {
        assert_eq!(
            "start Editor 42".parse::<HostEvent>().unwrap(),
            HostEvent::Start {
                app_name: "Editor".into(),
                task_id: Some(42)
            }
        );
        assert_eq!(
            "start Visual Studio Code".parse::<HostEvent>().unwrap(),
            HostEvent::Start {
                app_name: "Visual Studio Code".into(),
                task_id: None
            }
        );
        assert_eq!(
            "start 1Password".parse::<HostEvent>().unwrap(),
            HostEvent::Start {
                app_name: "1Password".into(),
                task_id: None
            }
        );
        assert_eq!(
            "offline".parse::<HostEvent>().unwrap(),
            HostEvent::Connectivity(false)
        );
        assert_eq!(
            "lock-screen".parse::<HostEvent>().unwrap(),
            HostEvent::Signal(HostSignal::LockScreen)
        );
        assert_eq!(
            "resume".parse::<HostEvent>().unwrap(),
            HostEvent::Signal(HostSignal::Resume)
        );
        assert!("start".parse::<HostEvent>().is_err());
        assert!("".parse::<HostEvent>().is_err());
        assert!("flush now".parse::<HostEvent>().is_err());
        assert!("reboot".parse::<HostEvent>().is_err());
    }

    #[test]
    fn test_terminal_events() {
        assert!(HostEvent::Destroy.is_terminal());
        assert!(HostEvent::Signal(HostSignal::Exit).is_terminal());
        assert!(!HostEvent::Signal(HostSignal::Suspend).is_terminal());
        assert!(!HostEvent::Flush.is_terminal());
    }
}
