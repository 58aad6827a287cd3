//! In-memory process table for exercising the engine without touching real processes.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use crate::error::MonitorError;

use super::{ProcessSnapshot, ProcessSnapshotSource, RunningProcessInfo, TerminateMode};

#[derive(Default)]
struct FakeState {
    processes: Vec<RunningProcessInfo>,
    frontmost_pid: Option<u32>,
    /// Ignore graceful requests, die on forceful.
    stubborn: HashSet<u32>,
    /// Survive everything.
    unkillable: HashSet<u32>,
    /// Signal delivery itself fails.
    refusing: HashSet<u32>,
    fail_queries: bool,
    signals: Vec<(u32, TerminateMode)>,
}

#[derive(Default)]
pub struct FakeProcessSource {
    state: Mutex<FakeState>,
}

impl FakeProcessSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        // A panicking test thread must not hide the table from the others.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, process: RunningProcessInfo) {
        self.state().processes.push(process);
    }

    pub fn remove(&self, pid: u32) {
        self.state().processes.retain(|p| p.pid != pid);
    }

    pub fn set_frontmost(&self, pid: Option<u32>) {
        self.state().frontmost_pid = pid;
    }

    pub fn mark_stubborn(&self, pid: u32) {
        self.state().stubborn.insert(pid);
    }

    pub fn mark_unkillable(&self, pid: u32) {
        self.state().unkillable.insert(pid);
    }

    pub fn refuse_signals(&self, pid: u32) {
        self.state().refusing.insert(pid);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.state().fail_queries = fail;
    }

    pub fn signals_sent(&self) -> Vec<(u32, TerminateMode)> {
        self.state().signals.clone()
    }

    pub fn running_pids(&self) -> Vec<u32> {
        self.state().processes.iter().map(|p| p.pid).collect()
    }
}

impl ProcessSnapshotSource for FakeProcessSource {
    fn snapshot(&self) -> Result<ProcessSnapshot, MonitorError> {
        let state = self.state();
        if state.fail_queries {
            return Err(MonitorError::query("simulated query failure"));
        }
        Ok(ProcessSnapshot::new(
            Utc::now(),
            state.frontmost_pid,
            state.processes.clone(),
        ))
    }

    fn send_terminate(&self, pid: u32, mode: TerminateMode) -> Result<(), MonitorError> {
        let mut state = self.state();
        if state.refusing.contains(&pid) {
            return Err(MonitorError::signal(pid, mode, "operation not permitted"));
        }
        if !state.processes.iter().any(|p| p.pid == pid) {
            return Err(MonitorError::signal(pid, mode, "no such process"));
        }

        state.signals.push((pid, mode));

        let survives = state.unkillable.contains(&pid)
            || (mode == TerminateMode::Graceful && state.stubborn.contains(&pid));
        if !survives {
            state.processes.retain(|p| p.pid != pid);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graceful_removes_cooperative_process() {
        let source = FakeProcessSource::new();
        source.add(RunningProcessInfo::new(7, "/Applications/A.app"));
        source.send_terminate(7, TerminateMode::Graceful).unwrap();
        assert!(source.running_pids().is_empty());
        assert_eq!(source.signals_sent(), vec![(7, TerminateMode::Graceful)]);
    }

    #[test]
    fn stubborn_process_needs_force() {
        let source = FakeProcessSource::new();
        source.add(RunningProcessInfo::new(7, "/Applications/A.app"));
        source.mark_stubborn(7);
        source.send_terminate(7, TerminateMode::Graceful).unwrap();
        assert_eq!(source.running_pids(), vec![7]);
        source.send_terminate(7, TerminateMode::Forceful).unwrap();
        assert!(source.running_pids().is_empty());
    }

    #[test]
    fn refused_signal_is_not_recorded() {
        let source = FakeProcessSource::new();
        source.add(RunningProcessInfo::new(7, "/Applications/A.app"));
        source.refuse_signals(7);
        assert!(source.send_terminate(7, TerminateMode::Forceful).is_err());
        assert!(source.signals_sent().is_empty());
    }
}
