pub mod fake;
pub mod types;

mod sysinfo_source;

#[cfg(target_os = "macos")]
mod macos;

pub use sysinfo_source::SysinfoProcessSource;
pub use types::{
    app_base_name, ActivationPolicy, ProcessSnapshot, RunningProcessInfo, TerminateMode, WindowInfo,
};

#[cfg(target_os = "macos")]
pub use macos::MacOsProcessSource;

#[cfg(target_os = "macos")]
pub use macos::MacOsProcessSource as NativeProcessSource;

#[cfg(not(target_os = "macos"))]
pub use sysinfo_source::SysinfoProcessSource as NativeProcessSource;

use std::sync::Arc;

use crate::error::MonitorError;

/// Read access to the OS process table plus the ability to ask a process to quit.
///
/// Implementations must tolerate processes disappearing between listing and
/// inspection; such processes are skipped, never reported as an error.
pub trait ProcessSnapshotSource: Send + Sync {
    fn snapshot(&self) -> Result<ProcessSnapshot, MonitorError>;

    fn send_terminate(&self, pid: u32, mode: TerminateMode) -> Result<(), MonitorError>;
}

/// Runs a (blocking) OS query off the async worker threads.
pub async fn snapshot_blocking(source: Arc<dyn ProcessSnapshotSource>) -> Result<ProcessSnapshot, MonitorError> {
    tokio::task::spawn_blocking(move || source.snapshot())
        .await
        .map_err(|err| MonitorError::query(format!("snapshot worker join failed: {err}")))?
}
