use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};
use tempfile::NamedTempFile;

pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATA_DIR_ENV: &str = "ACTIVITY_TRACKER_DATA_DIR";
pub const REMOTE_URL_ENV: &str = "ACTIVITY_TRACKER_REMOTE_URL";
pub const DEBUG_ENV: &str = "ACTIVITY_TRACKER_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerSettings {
    pub idle_threshold_secs: u64,
    pub idle_check_interval_secs: u64,
    pub sync_interval_secs: u64,
    pub retry_base_secs: u64,
    pub max_retries: u32,
    pub poll_interval_secs: u64,
    pub remote_url: Option<String>,
    pub remote_timeout_secs: u64,
    /// Argv of a command printing the focused app's name, e.g.
    /// `["xdotool", "getactivewindow", "getwindowclassname"]`.
    pub foreground_command: Option<Vec<String>>,
    pub initially_online: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            idle_threshold_secs: 60,
            idle_check_interval_secs: 10,
            sync_interval_secs: 300,
            retry_base_secs: 30,
            max_retries: 3,
            poll_interval_secs: 5,
            remote_url: None,
            remote_timeout_secs: 15,
            foreground_command: None,
            initially_online: true,
        }
    }
}

impl TrackerSettings {
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs.max(1))
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_secs(self.retry_base_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs.max(1))
    }

    /// Applies environment overrides on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(REMOTE_URL_ENV) {
            if !url.trim().is_empty() {
                self.remote_url = Some(url.trim().to_string());
            }
        }

        let debug_mode = std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.idle_threshold_secs = self.idle_threshold_secs.min(15);
            self.idle_check_interval_secs = self.idle_check_interval_secs.min(2);
            self.sync_interval_secs = self.sync_interval_secs.min(20);
            self.retry_base_secs = self.retry_base_secs.min(5);
        }
        self
    }
}

/// `$ACTIVITY_TRACKER_DATA_DIR`, else the platform data dir.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("activity-tracker")
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<TrackerSettings>,
}

impl SettingsStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!(
                    "Ignoring unparsable settings at {} ({err}); using defaults",
                    path.display()
                );
                TrackerSettings::default()
            })
        } else {
            TrackerSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn in_dir(dir: &Path) -> Result<Self> {
        Self::load(dir.join(SETTINGS_FILE_NAME))
    }

    pub fn settings(&self) -> TrackerSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, settings: TrackerSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.persist(&settings)?;
        *guard = settings;
        Ok(())
    }

    fn persist(&self, data: &TrackerSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(serialized.as_bytes())?;
        temp.persist(&self.path)
            .map_err(|err| err.error)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))?;
        Ok(())
    }
}
