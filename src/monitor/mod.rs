mod controller;
mod status;

pub use controller::{MonitorController, DEFAULT_TICK_INTERVAL};
pub use status::{AppState, AppStatus, MonitorStatus};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::process::{snapshot_blocking, ProcessSnapshot, ProcessSnapshotSource};
use crate::ranking::rank;
use crate::settings::MonitorSettings;
use crate::termination::{TerminationConfig, TerminationController};
use crate::tracker::MonitoredApp;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Owns every tracked app and runs one monitoring cycle at a time.
pub struct Monitor {
    source: Arc<dyn ProcessSnapshotSource>,
    terminator: TerminationController,
    settings: Arc<MonitorSettings>,
    apps: Vec<MonitoredApp>,
    cycle: u64,
    status_tx: watch::Sender<MonitorStatus>,
}

impl Monitor {
    pub fn new(
        settings: MonitorSettings,
        source: Arc<dyn ProcessSnapshotSource>,
        termination: TerminationConfig,
    ) -> Self {
        let now = Utc::now();
        let settings = Arc::new(settings);
        let apps = settings
            .app_paths
            .iter()
            .map(|path| MonitoredApp::new(path.clone(), Arc::clone(&settings), now))
            .collect();
        let (status_tx, _) = watch::channel(MonitorStatus::default());

        Self {
            terminator: TerminationController::new(Arc::clone(&source), termination),
            source,
            settings,
            apps,
            cycle: 0,
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status_tx.subscribe()
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn apps(&self) -> &[MonitoredApp] {
        &self.apps
    }

    /// Swaps in a new configuration. Apps that stay configured keep their
    /// idle clock; new ones start fresh at `now`.
    pub fn apply_settings(&mut self, settings: MonitorSettings, now: DateTime<Utc>) {
        let settings = Arc::new(settings);
        let mut previous: HashMap<String, MonitoredApp> = self
            .apps
            .drain(..)
            .map(|app| (app.install_path().to_string(), app))
            .collect();

        self.apps = settings
            .app_paths
            .iter()
            .map(|path| match previous.remove(path) {
                Some(mut app) => {
                    app.rebind(Arc::clone(&settings));
                    app
                }
                None => MonitoredApp::new(path.clone(), Arc::clone(&settings), now),
            })
            .collect();

        log_info!(
            "settings applied: {} app(s), delay {}s, top {}",
            self.apps.len(),
            settings.inactivity_delay_secs,
            settings.top_n
        );
        self.settings = settings;
    }

    /// One pass of snapshot, rank, refresh, evaluate and terminate. The
    /// resulting status is also pushed to every subscriber.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> MonitorStatus {
        self.cycle += 1;

        let (snapshot, queried) = match snapshot_blocking(Arc::clone(&self.source)).await {
            Ok(snapshot) => (snapshot, true),
            Err(err) => {
                log_warn!("cycle {}: {err}; treating as no running apps", self.cycle);
                (ProcessSnapshot::empty(now), false)
            }
        };

        let protected = rank(&snapshot, self.settings.top_n);

        for app in self.apps.iter_mut() {
            if protected.iter().any(|p| p == app.install_path()) {
                app.refresh_last_used(&snapshot, now);
            } else if queried {
                // A failed query says nothing about whether the app stopped.
                app.hold_idle_clock(&snapshot, now);
            }
        }

        let due: Vec<String> = self
            .apps
            .iter()
            .filter(|app| app.should_terminate(&snapshot, now))
            .map(|app| app.install_path().to_string())
            .collect();

        let mut terminated = Vec::new();
        let mut failed = Vec::new();
        for path in due {
            match self.terminator.terminate(&path).await.into_result() {
                Ok(report) => {
                    log_debug!("cycle {}: {path} closed via {:?}", self.cycle, report.states);
                    terminated.push(path);
                }
                Err(err) => {
                    log_warn!("cycle {}: {err}", self.cycle);
                    failed.push(path);
                }
            }
        }

        let apps = self
            .apps
            .iter()
            .map(|app| {
                let path = app.install_path();
                let running = app.is_running(&snapshot) && !terminated.iter().any(|t| t == path);
                let is_protected = protected.iter().any(|p| p == path);
                AppStatus {
                    install_path: path.to_string(),
                    display_name: app.display_name(&snapshot),
                    running,
                    remaining_secs: if running { app.remaining_secs(now) } else { 0 },
                    state: AppStatus::classify(running, is_protected),
                }
            })
            .collect();

        let status = MonitorStatus {
            cycle: self.cycle,
            taken_at: now,
            protected,
            apps,
            terminated,
            failed,
        };

        log_debug!(
            "cycle {}: protected {:?}, terminated {:?}, failed {:?}",
            status.cycle,
            status.protected,
            status.terminated,
            status.failed
        );

        self.status_tx.send_replace(status.clone());
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeProcessSource;
    use crate::process::{RunningProcessInfo, WindowInfo};
    use chrono::Duration;
    use tokio::time::Duration as StdDuration;

    const X: &str = "/Applications/X.app";
    const Y: &str = "/Applications/Y.app";

    fn settings(delay: u64, top_n: usize) -> MonitorSettings {
        MonitorSettings {
            app_paths: vec![X.to_string(), Y.to_string()],
            inactivity_delay_secs: delay,
            top_n,
        }
    }

    fn fast() -> TerminationConfig {
        TerminationConfig {
            grace_period: StdDuration::from_millis(40),
            poll_interval: StdDuration::from_millis(10),
            verify_window: StdDuration::from_millis(20),
        }
    }

    fn windowed(pid: u32, path: &str) -> RunningProcessInfo {
        let mut p = RunningProcessInfo::new(pid, path);
        p.windows.push(WindowInfo {
            layer: 0,
            on_screen: true,
            width: 900.0,
            height: 700.0,
        });
        p
    }

    /// X frontmost, Y running in the background.
    fn scenario() -> Arc<FakeProcessSource> {
        let source = Arc::new(FakeProcessSource::new());
        source.add(windowed(100, X));
        source.add(windowed(50, Y));
        source.set_frontmost(Some(100));
        source
    }

    fn monitor(source: &Arc<FakeProcessSource>, delay: u64, top_n: usize) -> Monitor {
        let dyn_source: Arc<dyn ProcessSnapshotSource> = source.clone();
        Monitor::new(settings(delay, top_n), dyn_source, fast())
    }

    #[tokio::test]
    async fn unprotected_app_is_closed_exactly_at_the_delay() {
        let source = scenario();
        let mut monitor = monitor(&source, 10, 1);
        let start = monitor.apps()[0].last_used_at();

        let status = monitor.run_cycle(start).await;
        assert_eq!(status.protected, vec![X.to_string()]);
        assert_eq!(status.app(X).map(|a| a.state), Some(AppState::InUse));
        assert_eq!(status.app(Y).map(|a| a.state), Some(AppState::CountingDown));

        let status = monitor.run_cycle(start + Duration::seconds(9)).await;
        assert!(status.terminated.is_empty());
        assert_eq!(status.app(Y).map(|a| a.remaining_secs), Some(1));
        assert!(source.signals_sent().is_empty());

        let status = monitor.run_cycle(start + Duration::seconds(10)).await;
        assert_eq!(status.terminated, vec![Y.to_string()]);
        assert_eq!(status.app(Y).map(|a| a.state), Some(AppState::NotRunning));
        assert_eq!(status.app(X).map(|a| a.state), Some(AppState::InUse));
        assert_eq!(source.running_pids(), vec![100]);
    }

    #[tokio::test]
    async fn protected_app_never_becomes_due() {
        let source = scenario();
        let mut monitor = monitor(&source, 10, 1);
        let start = monitor.apps()[0].last_used_at();

        for secs in [0, 5, 10, 20, 60] {
            let now = start + Duration::seconds(secs);
            monitor.run_cycle(now).await;
            let x = &monitor.apps()[0];
            assert!(!x.should_terminate(&source.snapshot().unwrap(), now));
        }
        assert!(source.running_pids().contains(&100));
    }

    #[tokio::test]
    async fn failed_query_protects_and_kills_nothing() {
        let source = scenario();
        let mut monitor = monitor(&source, 1, 1);
        let start = monitor.apps()[0].last_used_at();
        source.fail_queries(true);

        let status = monitor.run_cycle(start + Duration::seconds(30)).await;
        assert!(status.protected.is_empty());
        assert!(status.apps.iter().all(|a| a.state == AppState::NotRunning));
        assert!(source.signals_sent().is_empty());
    }

    #[tokio::test]
    async fn failed_termination_is_retried_next_cycle() {
        let source = scenario();
        source.mark_unkillable(50);
        let mut monitor = monitor(&source, 1, 1);
        let start = monitor.apps()[0].last_used_at();

        let status = monitor.run_cycle(start + Duration::seconds(2)).await;
        assert_eq!(status.failed, vec![Y.to_string()]);
        assert_eq!(status.app(Y).map(|a| a.running), Some(true));

        let status = monitor.run_cycle(start + Duration::seconds(3)).await;
        assert_eq!(status.failed, vec![Y.to_string()]);
        assert_eq!(monitor.apps().len(), 2);
    }

    #[tokio::test]
    async fn one_failed_close_does_not_stop_the_next() {
        const Z: &str = "/Applications/Z.app";
        let source = scenario();
        source.add(windowed(40, Z));
        source.mark_unkillable(50);

        let dyn_source: Arc<dyn ProcessSnapshotSource> = source.clone();
        let settings = MonitorSettings {
            app_paths: vec![Y.to_string(), Z.to_string()],
            inactivity_delay_secs: 1,
            top_n: 1,
        };
        let mut monitor = Monitor::new(settings, dyn_source, fast());
        let start = monitor.apps()[0].last_used_at();

        let status = monitor.run_cycle(start + Duration::seconds(2)).await;
        assert_eq!(status.failed, vec![Y.to_string()]);
        assert_eq!(status.terminated, vec![Z.to_string()]);
        assert_eq!(source.running_pids(), vec![100, 50]);
    }

    #[tokio::test]
    async fn relaunched_app_gets_a_fresh_countdown() {
        let source = Arc::new(FakeProcessSource::new());
        source.add(windowed(100, X));
        source.set_frontmost(Some(100));
        let mut monitor = monitor(&source, 10, 1);
        let start = monitor.apps()[0].last_used_at();

        let status = monitor.run_cycle(start + Duration::seconds(30)).await;
        assert_eq!(status.app(Y).map(|a| a.state), Some(AppState::NotRunning));
        assert_eq!(status.app(Y).map(|a| a.remaining_secs), Some(0));

        let launched = start + Duration::seconds(60);
        let mut y = windowed(50, Y);
        y.launched_at = Some(launched);
        source.add(y);

        let status = monitor.run_cycle(launched).await;
        assert!(status.terminated.is_empty());
        assert_eq!(status.app(Y).map(|a| a.remaining_secs), Some(10));

        let status = monitor.run_cycle(launched + Duration::seconds(9)).await;
        assert!(status.terminated.is_empty());

        let status = monitor.run_cycle(launched + Duration::seconds(10)).await;
        assert_eq!(status.terminated, vec![Y.to_string()]);
    }

    #[tokio::test]
    async fn subscribers_see_each_cycle() {
        let source = scenario();
        let mut monitor = monitor(&source, 600, 2);
        let mut rx = monitor.subscribe();

        monitor.run_cycle(Utc::now()).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().cycle, 1);

        monitor.run_cycle(Utc::now()).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().cycle, 2);
    }

    #[tokio::test]
    async fn new_settings_keep_idle_clock_for_surviving_apps() {
        let source = scenario();
        let mut monitor = monitor(&source, 600, 1);
        let y_used = monitor.apps()[1].last_used_at();

        let later = y_used + Duration::seconds(120);
        monitor.apply_settings(
            MonitorSettings {
                app_paths: vec![Y.to_string(), "/Applications/Z.app".to_string()],
                inactivity_delay_secs: 30,
                top_n: 1,
            },
            later,
        );

        let apps = monitor.apps();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].install_path(), Y);
        assert_eq!(apps[0].last_used_at(), y_used);
        assert_eq!(apps[0].settings().inactivity_delay_secs, 30);
        assert_eq!(apps[1].last_used_at(), later);
    }
}
