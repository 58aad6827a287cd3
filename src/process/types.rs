use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// How the OS lets a process present itself to the user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ActivationPolicy {
    /// Ordinary app with a Dock icon and menu bar.
    Regular,
    /// Agent/menu-bar-only app; may own windows but never becomes frontmost by itself.
    Accessory,
    /// Pure background process.
    Prohibited,
}

impl Default for ActivationPolicy {
    fn default() -> Self {
        ActivationPolicy::Regular
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TerminateMode {
    Graceful,
    Forceful,
}

impl fmt::Display for TerminateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminateMode::Graceful => f.write_str("graceful"),
            TerminateMode::Forceful => f.write_str("forceful"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub layer: i64,
    pub on_screen: bool,
    pub width: f64,
    pub height: f64,
}

impl WindowInfo {
    const MIN_EDGE: f64 = 50.0;

    /// A real document/app window rather than a status item or helper overlay.
    pub fn is_substantial(&self) -> bool {
        self.on_screen && self.layer == 0 && self.width > Self::MIN_EDGE && self.height > Self::MIN_EDGE
    }
}

/// One live process as seen at a single sampling instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunningProcessInfo {
    pub pid: u32,
    pub bundle_path: Option<String>,
    pub name: Option<String>,
    pub hidden: bool,
    pub activation_policy: ActivationPolicy,
    pub launched_at: Option<DateTime<Utc>>,
    pub windows: Vec<WindowInfo>,
}

impl RunningProcessInfo {
    pub fn new(pid: u32, bundle_path: impl Into<String>) -> Self {
        Self {
            pid,
            bundle_path: Some(bundle_path.into()),
            name: None,
            hidden: false,
            activation_policy: ActivationPolicy::Regular,
            launched_at: None,
            windows: Vec::new(),
        }
    }

    pub fn is_regular(&self) -> bool {
        self.activation_policy == ActivationPolicy::Regular
    }

    /// Regular, unhidden app the user could be looking at.
    pub fn is_user_facing(&self) -> bool {
        self.is_regular() && !self.hidden
    }

    pub fn has_substantial_window(&self) -> bool {
        self.windows.iter().any(WindowInfo::is_substantial)
    }

    /// Whether this process belongs to the app installed at `install_path`:
    /// the bundle itself, something nested inside it, or a sibling helper
    /// carrying the app's base name.
    pub fn is_related_to(&self, install_path: &str) -> bool {
        let Some(bundle_path) = self.bundle_path.as_deref() else {
            return false;
        };

        if bundle_path == install_path {
            return true;
        }

        let trimmed = install_path.trim_end_matches('/');
        if bundle_path.starts_with(&format!("{trimmed}/")) {
            return true;
        }

        match app_base_name(install_path) {
            Some(base) if !base.is_empty() => bundle_path.contains(base.as_str()),
            _ => false,
        }
    }
}

/// Everything the OS reported during one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSnapshot {
    pub taken_at: DateTime<Utc>,
    pub frontmost_pid: Option<u32>,
    pub processes: Vec<RunningProcessInfo>,
}

impl ProcessSnapshot {
    pub fn new(taken_at: DateTime<Utc>, frontmost_pid: Option<u32>, processes: Vec<RunningProcessInfo>) -> Self {
        Self {
            taken_at,
            frontmost_pid,
            processes,
        }
    }

    /// Stand-in used when the OS query fails; nothing is running, nothing is protected.
    pub fn empty(taken_at: DateTime<Utc>) -> Self {
        Self::new(taken_at, None, Vec::new())
    }

    pub fn frontmost(&self) -> Option<&RunningProcessInfo> {
        let pid = self.frontmost_pid?;
        self.processes.iter().find(|p| p.pid == pid)
    }

    /// Visible processes whose bundle path is exactly `install_path`.
    pub fn instances_of<'a>(&'a self, install_path: &'a str) -> impl Iterator<Item = &'a RunningProcessInfo> + 'a {
        self.processes
            .iter()
            .filter(move |p| !p.hidden && p.bundle_path.as_deref() == Some(install_path))
    }

    pub fn related_to<'a>(&'a self, install_path: &'a str) -> impl Iterator<Item = &'a RunningProcessInfo> + 'a {
        self.processes.iter().filter(move |p| p.is_related_to(install_path))
    }
}

/// `/Applications/Slack.app` -> `Slack`.
pub fn app_base_name(install_path: &str) -> Option<String> {
    Path::new(install_path.trim_end_matches('/'))
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
}
