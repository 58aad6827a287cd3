use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System, UpdateKind};

use crate::error::MonitorError;

use super::{ActivationPolicy, ProcessSnapshot, ProcessSnapshotSource, RunningProcessInfo, TerminateMode};

/// Portable process source backed by the `sysinfo` process table.
///
/// There is no notion of hidden apps, activation policy or window geometry
/// here, so every process counts as a regular foreground app without windows.
pub struct SysinfoProcessSource {
    system: Mutex<System>,
    own_pid: u32,
}

impl SysinfoProcessSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            own_pid: std::process::id(),
        }
    }
}

impl Default for SysinfoProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSnapshotSource for SysinfoProcessSource {
    fn snapshot(&self) -> Result<ProcessSnapshot, MonitorError> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| MonitorError::query("process table lock poisoned"))?;

        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
        );

        let processes = system
            .processes()
            .iter()
            .filter_map(|(pid, process)| {
                let pid = pid.as_u32();
                if pid == self.own_pid || process.status() == ProcessStatus::Zombie {
                    return None;
                }

                let bundle_path = process.exe().map(bundle_root);
                Some(RunningProcessInfo {
                    pid,
                    bundle_path,
                    name: Some(process.name().to_string_lossy().into_owned()),
                    hidden: false,
                    activation_policy: ActivationPolicy::Regular,
                    launched_at: launch_time(process.start_time()),
                    windows: Vec::new(),
                })
            })
            .collect();

        Ok(ProcessSnapshot::new(Utc::now(), None, processes))
    }

    fn send_terminate(&self, pid: u32, mode: TerminateMode) -> Result<(), MonitorError> {
        let system = self
            .system
            .lock()
            .map_err(|_| MonitorError::signal(pid, mode, "process table lock poisoned"))?;

        let process = system
            .process(Pid::from_u32(pid))
            .ok_or_else(|| MonitorError::signal(pid, mode, "no such process"))?;

        let delivered = match mode {
            TerminateMode::Graceful => process.kill_with(Signal::Term).unwrap_or(false),
            TerminateMode::Forceful => process.kill(),
        };

        if delivered {
            Ok(())
        } else {
            Err(MonitorError::signal(pid, mode, "signal refused"))
        }
    }
}

/// Truncates an executable path right after its outermost `.app` bundle, so
/// `/Applications/Foo.app/Contents/MacOS/Foo` becomes `/Applications/Foo.app`.
/// Paths outside a bundle are returned unchanged.
fn bundle_root(exe: &Path) -> String {
    let mut root = std::path::PathBuf::new();
    for component in exe.components() {
        root.push(component);
        if component
            .as_os_str()
            .to_string_lossy()
            .to_ascii_lowercase()
            .ends_with(".app")
        {
            return root.to_string_lossy().into_owned();
        }
    }
    exe.to_string_lossy().into_owned()
}

fn launch_time(start_secs: u64) -> Option<DateTime<Utc>> {
    if start_secs == 0 {
        return None;
    }
    i64::try_from(start_secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_root_stops_at_outer_app() {
        let exe = Path::new("/Applications/Slack.app/Contents/Frameworks/Slack Helper.app/Contents/MacOS/Slack Helper");
        assert_eq!(bundle_root(exe), "/Applications/Slack.app");
    }

    #[test]
    fn bundle_root_keeps_plain_binaries() {
        assert_eq!(bundle_root(Path::new("/usr/bin/top")), "/usr/bin/top");
    }

    #[test]
    fn zero_start_time_means_unknown() {
        assert!(launch_time(0).is_none());
        assert_eq!(launch_time(1_700_000_000).map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[test]
    fn snapshot_never_lists_ourselves() {
        let source = SysinfoProcessSource::new();
        let snapshot = source.snapshot().unwrap();
        let own = std::process::id();
        assert!(snapshot.processes.iter().all(|p| p.pid != own));
    }

    #[test]
    fn signalling_missing_pid_is_an_error() {
        let source = SysinfoProcessSource::new();
        source.snapshot().unwrap();
        let err = source.send_terminate(u32::MAX - 1, TerminateMode::Graceful);
        assert!(matches!(err, Err(MonitorError::SignalSend { .. })));
    }
}
