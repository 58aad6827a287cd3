use serde::Serialize;
use std::sync::Arc;
use tokio::time::{self, Duration, Instant};

use crate::error::MonitorError;
use crate::process::{snapshot_blocking, ProcessSnapshotSource, TerminateMode};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

const GRACE_PERIOD: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const VERIFY_WINDOW: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct TerminationConfig {
    /// How long a graceful quit may take before escalating.
    pub grace_period: Duration,
    pub poll_interval: Duration,
    /// How long to watch for survivors after a forceful kill.
    pub verify_window: Duration,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            grace_period: GRACE_PERIOD,
            poll_interval: POLL_INTERVAL,
            verify_window: VERIFY_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TerminationState {
    Idle,
    GracefulSent,
    Waiting,
    Escalating,
    Terminated,
    GiveUp,
}

/// What happened during one termination attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationReport {
    pub install_path: String,
    /// Every state visited, starting with `Idle`.
    pub states: Vec<TerminationState>,
    pub graceful_sent: Vec<u32>,
    pub forceful_sent: Vec<u32>,
    pub survivors: Vec<u32>,
}

impl TerminationReport {
    fn new(install_path: &str) -> Self {
        Self {
            install_path: install_path.to_string(),
            states: vec![TerminationState::Idle],
            graceful_sent: Vec::new(),
            forceful_sent: Vec::new(),
            survivors: Vec::new(),
        }
    }

    fn advance(&mut self, state: TerminationState) {
        self.states.push(state);
    }

    pub fn state(&self) -> TerminationState {
        self.states.last().copied().unwrap_or(TerminationState::Idle)
    }

    pub fn succeeded(&self) -> bool {
        self.state() == TerminationState::Terminated
    }

    pub fn escalated(&self) -> bool {
        self.states.contains(&TerminationState::Escalating)
    }

    pub fn into_result(self) -> Result<Self, MonitorError> {
        if self.succeeded() {
            Ok(self)
        } else {
            Err(MonitorError::TerminationFailed {
                install_path: self.install_path,
                survivors: self.survivors,
            })
        }
    }
}

/// Quits an app and everything it spawned: ask nicely, wait, then force.
#[derive(Clone)]
pub struct TerminationController {
    source: Arc<dyn ProcessSnapshotSource>,
    config: TerminationConfig,
}

impl TerminationController {
    pub fn new(source: Arc<dyn ProcessSnapshotSource>, config: TerminationConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &TerminationConfig {
        &self.config
    }

    /// Runs the full graceful-then-forceful sequence for the app at
    /// `install_path`. Never fails outright: the report says whether every
    /// related process is gone.
    pub async fn terminate(&self, install_path: &str) -> TerminationReport {
        let mut report = TerminationReport::new(install_path);

        let related = match snapshot_blocking(Arc::clone(&self.source)).await {
            Ok(snapshot) => snapshot
                .related_to(install_path)
                .map(|p| (p.pid, p.is_regular()))
                .collect::<Vec<_>>(),
            Err(err) => {
                log_warn!("cannot discover processes for {install_path}: {err}");
                report.advance(TerminationState::GiveUp);
                return report;
            }
        };

        if related.is_empty() {
            log_info!("nothing to terminate for {install_path}; no related processes");
            report.advance(TerminationState::GiveUp);
            return report;
        }

        // Quitting the main app normally takes its helpers down with it.
        let regular: Vec<u32> = related
            .iter()
            .filter(|(_, regular)| *regular)
            .map(|(pid, _)| *pid)
            .collect();
        let targets = if regular.is_empty() {
            related.iter().map(|(pid, _)| *pid).collect()
        } else {
            regular
        };

        log_info!(
            "terminating {install_path}: {} related process(es), graceful to {:?}",
            related.len(),
            targets
        );
        report.graceful_sent = self.signal_all(&targets, TerminateMode::Graceful);
        report.advance(TerminationState::GracefulSent);

        report.advance(TerminationState::Waiting);
        let initial: Vec<u32> = related.iter().map(|(pid, _)| *pid).collect();
        let survivors = self
            .wait_for_exit(install_path, initial, self.config.grace_period)
            .await;
        if survivors.is_empty() {
            log_info!("{install_path} quit gracefully");
            report.advance(TerminationState::Terminated);
            return report;
        }

        log_warn!(
            "{install_path} still has {} process(es) after {:?}; forcing {:?}",
            survivors.len(),
            self.config.grace_period,
            survivors
        );
        report.advance(TerminationState::Escalating);
        report.forceful_sent = self.signal_all(&survivors, TerminateMode::Forceful);

        let survivors = self
            .wait_for_exit(install_path, survivors, self.config.verify_window)
            .await;
        if survivors.is_empty() {
            log_info!("{install_path} force-terminated");
            report.advance(TerminationState::Terminated);
        } else {
            log_warn!("giving up on {install_path} for now; survivors {survivors:?}");
            report.survivors = survivors;
            report.advance(TerminationState::GiveUp);
        }
        report
    }

    /// Sends `mode` to each pid, returning those the OS accepted. A refusal
    /// for one pid does not stop the rest.
    fn signal_all(&self, pids: &[u32], mode: TerminateMode) -> Vec<u32> {
        pids.iter()
            .copied()
            .filter(|&pid| match self.source.send_terminate(pid, mode) {
                Ok(()) => true,
                Err(err) => {
                    log_error!("{err}");
                    false
                }
            })
            .collect()
    }

    /// Polls until no related process is left or `window` elapses, returning
    /// whatever is still alive. A failed query keeps the previous answer.
    async fn wait_for_exit(&self, install_path: &str, mut alive: Vec<u32>, window: Duration) -> Vec<u32> {
        let deadline = Instant::now() + window;
        loop {
            match snapshot_blocking(Arc::clone(&self.source)).await {
                Ok(snapshot) => {
                    alive = snapshot.related_to(install_path).map(|p| p.pid).collect();
                }
                Err(err) => log_warn!("poll for {install_path} failed: {err}"),
            }

            if alive.is_empty() {
                return alive;
            }

            let now = Instant::now();
            if now >= deadline {
                return alive;
            }
            time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }
}
