use chrono::{DateTime, Utc};
use serde::Serialize;

/// Coarse state for colour-coding an app in a status display.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum AppState {
    NotRunning,
    /// Running and among the protected top-N this cycle.
    InUse,
    /// Running, unprotected, and accruing idle time.
    CountingDown,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    pub install_path: String,
    pub display_name: String,
    pub running: bool,
    pub remaining_secs: u64,
    pub state: AppState,
}

impl AppStatus {
    pub fn classify(running: bool, protected: bool) -> AppState {
        match (running, protected) {
            (false, _) => AppState::NotRunning,
            (true, true) => AppState::InUse,
            (true, false) => AppState::CountingDown,
        }
    }
}

/// Immutable picture of the monitor after one cycle.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub cycle: u64,
    pub taken_at: DateTime<Utc>,
    pub protected: Vec<String>,
    pub apps: Vec<AppStatus>,
    /// Apps successfully quit during this cycle.
    pub terminated: Vec<String>,
    /// Apps whose termination attempt gave up this cycle.
    pub failed: Vec<String>,
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self {
            cycle: 0,
            taken_at: Utc::now(),
            protected: Vec::new(),
            apps: Vec::new(),
            terminated: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl MonitorStatus {
    pub fn app(&self, install_path: &str) -> Option<&AppStatus> {
        self.apps.iter().find(|a| a.install_path == install_path)
    }
}
