use anyhow::{Context, Result};
use directories::ProjectDirs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::SystemTime,
};

use crate::error::MonitorError;

pub const DEFAULT_INACTIVITY_DELAY_SECS: u64 = 30 * 60;
pub const DEFAULT_TOP_N: usize = 3;

const SETTINGS_ENV: &str = "IDLEQUIT_SETTINGS";
const SETTINGS_FILE: &str = "settings.json";

/// What the monitor needs to know: which apps to manage, how long they may
/// idle, and how many recently used apps are always spared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(rename = "appPaths", default)]
    pub app_paths: Vec<String>,
    #[serde(rename = "inactivityDelay", default = "default_delay")]
    pub inactivity_delay_secs: u64,
    #[serde(rename = "topN", default = "default_top_n")]
    pub top_n: usize,
}

fn default_delay() -> u64 {
    DEFAULT_INACTIVITY_DELAY_SECS
}

fn default_top_n() -> usize {
    DEFAULT_TOP_N
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            app_paths: Vec::new(),
            inactivity_delay_secs: DEFAULT_INACTIVITY_DELAY_SECS,
            top_n: DEFAULT_TOP_N,
        }
    }
}

impl MonitorSettings {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.inactivity_delay_secs == 0 {
            return Err(MonitorError::InvalidSettings {
                field: "inactivityDelay",
                reason: "must be positive".into(),
            });
        }
        if self.top_n == 0 {
            return Err(MonitorError::InvalidSettings {
                field: "topN",
                reason: "must be positive".into(),
            });
        }
        if let Some(path) = self.app_paths.iter().find(|p| !Path::new(p).is_absolute()) {
            return Err(MonitorError::InvalidSettings {
                field: "appPaths",
                reason: format!("'{path}' is not an absolute path"),
            });
        }
        Ok(())
    }

    /// Drops repeated paths, keeping the first occurrence.
    pub fn dedup_paths(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.app_paths.retain(|p| seen.insert(p.clone()));
    }
}

/// JSON-backed settings with an in-memory cached copy.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<MonitorSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = read_settings(&path)?;
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// `$IDLEQUIT_SETTINGS`, else `settings.json` in the platform data directory.
    pub fn default_path() -> Result<PathBuf> {
        if let Ok(custom) = std::env::var(SETTINGS_ENV) {
            return Ok(PathBuf::from(custom));
        }
        let dirs = ProjectDirs::from("com", "idlequit", "IdleQuit")
            .context("Could not determine project directories")?;
        let data_dir = dirs.data_dir();
        fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create {}", data_dir.display()))?;
        Ok(data_dir.join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> MonitorSettings {
        self.read().clone()
    }

    pub fn update(&self, settings: MonitorSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        *guard = settings;
        guard.dedup_paths();
        self.persist(&guard)
    }

    pub fn add_app_path(&self, path: &str) -> Result<()> {
        let mut next = self.current();
        if next.app_paths.iter().any(|p| p == path) {
            return Ok(());
        }
        next.app_paths.push(path.to_string());
        self.update(next)
    }

    pub fn remove_app_path(&self, path: &str) -> Result<bool> {
        let mut next = self.current();
        let before = next.app_paths.len();
        next.app_paths.retain(|p| p != path);
        if next.app_paths.len() == before {
            return Ok(false);
        }
        self.update(next)?;
        Ok(true)
    }

    pub fn reload(&self) -> Result<MonitorSettings> {
        let data = read_settings(&self.path)?;
        *self.write() = data.clone();
        Ok(data)
    }

    /// Last modification time of the backing file, if it exists.
    pub fn modified_at(&self) -> Option<SystemTime> {
        fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    fn persist(&self, data: &MonitorSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, MonitorSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MonitorSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn read_settings(path: &Path) -> Result<MonitorSettings> {
    if !path.exists() {
        return Ok(MonitorSettings::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;

    let mut settings = match serde_json::from_str::<MonitorSettings>(&contents) {
        Ok(settings) => settings,
        Err(err) => {
            warn!("Ignoring unreadable settings at {}: {err}", path.display());
            return Ok(MonitorSettings::default());
        }
    };

    if let Err(err) = settings.validate() {
        warn!("Settings at {} rejected ({err}); using defaults", path.display());
        return Ok(MonitorSettings::default());
    }

    settings.dedup_paths();
    Ok(settings)
}
