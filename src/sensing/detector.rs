//! Collaborators the polling loop consumes: where the focused app comes
//! from and how an app maps to a task.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

#[async_trait]
pub trait ForegroundAppDetector: Send + Sync {
    /// Raw name of the focused application, if any.
    async fn foreground_app(&self) -> Result<Option<String>>;
}

#[async_trait]
pub trait TaskLookup: Send + Sync {
    /// Open (not completed) task attributed to `app_name`.
    async fn find_task_id_for_app(&self, app_name: &str) -> Result<Option<i64>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopForegroundDetector;

#[async_trait]
impl ForegroundAppDetector for NoopForegroundDetector {
    async fn foreground_app(&self) -> Result<Option<String>> {
        Ok(None)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTaskLookup;

#[async_trait]
impl TaskLookup for NoopTaskLookup {
    async fn find_task_id_for_app(&self, _app_name: &str) -> Result<Option<i64>> {
        Ok(None)
    }
}

/// Runs an external command and takes the first line of stdout as the app
/// name (e.g. `xdotool getactivewindow getwindowclassname`).
#[derive(Debug, Clone)]
pub struct CommandForegroundDetector {
    program: String,
    args: Vec<String>,
}

impl CommandForegroundDetector {
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl ForegroundAppDetector for CommandForegroundDetector {
    async fn foreground_app(&self) -> Result<Option<String>> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {}", self.program))?;

        if !output.status.success() {
            bail!("{} exited with {}", self.program, output.status);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_argv_has_no_detector() {
        assert!(CommandForegroundDetector::from_argv(&[]).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_detector_reads_first_line() {
        let argv = vec!["printf".to_string(), "\\nEditor\\nOther\\n".to_string()];
        let detector = CommandForegroundDetector::from_argv(&argv).unwrap();
        assert_eq!(
            detector.foreground_app().await.unwrap(),
            Some("Editor".to_string())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_detector_reports_failure() {
        let argv = vec!["false".to_string()];
        let detector = CommandForegroundDetector::from_argv(&argv).unwrap();
        assert!(detector.foreground_app().await.is_err());
    }
}
