use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::process::{app_base_name, ProcessSnapshot};
use crate::settings::MonitorSettings;

// Far beyond any sane delay, well inside chrono's range.
const MAX_DELAY_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Bookkeeping for one managed app, keyed by its install path.
#[derive(Debug, Clone)]
pub struct MonitoredApp {
    install_path: String,
    last_used_at: DateTime<Utc>,
    settings: Arc<MonitorSettings>,
}

impl MonitoredApp {
    pub fn new(install_path: impl Into<String>, settings: Arc<MonitorSettings>, now: DateTime<Utc>) -> Self {
        Self {
            install_path: install_path.into(),
            last_used_at: now,
            settings,
        }
    }

    pub fn install_path(&self) -> &str {
        &self.install_path
    }

    pub fn last_used_at(&self) -> DateTime<Utc> {
        self.last_used_at
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub(crate) fn rebind(&mut self, settings: Arc<MonitorSettings>) {
        self.settings = settings;
    }

    pub fn inactivity_delay(&self) -> Duration {
        let secs = i64::try_from(self.settings.inactivity_delay_secs).unwrap_or(MAX_DELAY_SECS);
        Duration::seconds(secs.min(MAX_DELAY_SECS))
    }

    pub fn is_running(&self, snapshot: &ProcessSnapshot) -> bool {
        snapshot.instances_of(&self.install_path).next().is_some()
    }

    pub fn time_inactive(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_used_at).max(Duration::zero())
    }

    pub fn should_terminate(&self, snapshot: &ProcessSnapshot, now: DateTime<Utc>) -> bool {
        self.is_running(snapshot) && self.time_inactive(now) >= self.inactivity_delay()
    }

    /// Marks the app as used at `now`, or at its launch time if the running
    /// instance claims to have started later than that.
    pub fn refresh_last_used(&mut self, snapshot: &ProcessSnapshot, now: DateTime<Utc>) {
        self.last_used_at = match self.latest_launch(snapshot) {
            Some(launched) => now.max(launched),
            None => now,
        };
    }

    /// Idle time only accrues while an instance is up: a stopped app keeps
    /// its clock pinned to `now`, and a running one never counts from before
    /// its newest launch.
    pub fn hold_idle_clock(&mut self, snapshot: &ProcessSnapshot, now: DateTime<Utc>) {
        if !self.is_running(snapshot) {
            self.last_used_at = self.last_used_at.max(now);
        } else if let Some(launched) = self.latest_launch(snapshot) {
            self.last_used_at = self.last_used_at.max(launched);
        }
    }

    fn latest_launch(&self, snapshot: &ProcessSnapshot) -> Option<DateTime<Utc>> {
        snapshot
            .instances_of(&self.install_path)
            .filter_map(|p| p.launched_at)
            .max()
    }

    /// Whole seconds left before the app becomes eligible, rounded up.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        let left = self.inactivity_delay() - self.time_inactive(now);
        if left <= Duration::zero() {
            return 0;
        }
        let millis = u64::try_from(left.num_milliseconds()).unwrap_or(0);
        millis.div_ceil(1000)
    }

    /// Name advertised by a running instance, else the bundle file name
    /// without its extension.
    pub fn display_name(&self, snapshot: &ProcessSnapshot) -> String {
        snapshot
            .instances_of(&self.install_path)
            .find_map(|p| p.name.clone())
            .or_else(|| app_base_name(&self.install_path))
            .unwrap_or_else(|| self.install_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::RunningProcessInfo;

    const PATH: &str = "/Applications/Notes.app";

    fn settings(delay: u64) -> Arc<MonitorSettings> {
        Arc::new(MonitorSettings {
            app_paths: vec![PATH.to_string()],
            inactivity_delay_secs: delay,
            top_n: 1,
        })
    }

    fn running(now: DateTime<Utc>) -> ProcessSnapshot {
        ProcessSnapshot::new(now, None, vec![RunningProcessInfo::new(42, PATH)])
    }

    #[test]
    fn not_running_never_terminates() {
        let start = Utc::now();
        let app = MonitoredApp::new(PATH, settings(10), start - Duration::days(30));
        let empty = ProcessSnapshot::empty(start);
        assert!(!app.is_running(&empty));
        assert!(!app.should_terminate(&empty, start));
        assert!(!app.should_terminate(&empty, start + Duration::days(365)));
    }

    #[test]
    fn boundary_is_inclusive() {
        let start = Utc::now();
        let app = MonitoredApp::new(PATH, settings(10), start);
        let snap = running(start);
        assert!(!app.should_terminate(&snap, start + Duration::seconds(9)));
        assert!(app.should_terminate(&snap, start + Duration::seconds(10)));
        assert!(app.should_terminate(&snap, start + Duration::seconds(11)));
    }

    #[test]
    fn hidden_instance_does_not_count_as_running() {
        let start = Utc::now();
        let app = MonitoredApp::new(PATH, settings(1), start);
        let mut hidden = RunningProcessInfo::new(42, PATH);
        hidden.hidden = true;
        let snap = ProcessSnapshot::new(start, None, vec![hidden]);
        assert!(!app.should_terminate(&snap, start + Duration::seconds(5)));
    }

    #[test]
    fn nested_helper_alone_is_not_running() {
        let start = Utc::now();
        let app = MonitoredApp::new(PATH, settings(1), start);
        let helper = RunningProcessInfo::new(43, "/Applications/Notes.app/Contents/XPCServices/Sync.xpc");
        let snap = ProcessSnapshot::new(start, None, vec![helper]);
        assert!(!app.is_running(&snap));
    }

    #[test]
    fn refresh_uses_now_for_old_launches() {
        let start = Utc::now();
        let mut app = MonitoredApp::new(PATH, settings(10), start - Duration::seconds(100));
        let mut proc_info = RunningProcessInfo::new(42, PATH);
        proc_info.launched_at = Some(start - Duration::hours(2));
        let snap = ProcessSnapshot::new(start, None, vec![proc_info]);

        app.refresh_last_used(&snap, start);
        assert_eq!(app.last_used_at(), start);
        assert_eq!(app.time_inactive(start), Duration::zero());
    }

    #[test]
    fn refresh_floors_at_future_launch_time() {
        let start = Utc::now();
        let mut app = MonitoredApp::new(PATH, settings(10), start - Duration::seconds(100));
        let launched = start + Duration::seconds(3);
        let mut proc_info = RunningProcessInfo::new(42, PATH);
        proc_info.launched_at = Some(launched);
        let snap = ProcessSnapshot::new(start, None, vec![proc_info]);

        app.refresh_last_used(&snap, start);
        assert_eq!(app.last_used_at(), launched);
    }

    #[test]
    fn refresh_is_monotonic_while_running() {
        let start = Utc::now();
        let mut app = MonitoredApp::new(PATH, settings(10), start);
        let snap = running(start);
        let mut previous = app.last_used_at();
        for step in 1..5 {
            app.refresh_last_used(&snap, start + Duration::seconds(step));
            assert!(app.last_used_at() >= previous);
            previous = app.last_used_at();
        }
    }

    #[test]
    fn idle_clock_holds_while_stopped() {
        let start = Utc::now();
        let mut app = MonitoredApp::new(PATH, settings(10), start);
        let later = start + Duration::seconds(300);

        app.hold_idle_clock(&ProcessSnapshot::empty(later), later);
        assert_eq!(app.last_used_at(), later);
        assert!(!app.should_terminate(&running(later), later));
    }

    #[test]
    fn idle_clock_starts_no_earlier_than_launch() {
        let start = Utc::now();
        let mut app = MonitoredApp::new(PATH, settings(10), start);
        let launched = start + Duration::seconds(60);
        let mut proc_info = RunningProcessInfo::new(42, PATH);
        proc_info.launched_at = Some(launched);
        let snap = ProcessSnapshot::new(launched, None, vec![proc_info]);

        app.hold_idle_clock(&snap, launched + Duration::seconds(1));
        assert_eq!(app.last_used_at(), launched);

        // An older launch never moves the clock backwards.
        let mut old = RunningProcessInfo::new(42, PATH);
        old.launched_at = Some(start - Duration::hours(1));
        let snap = ProcessSnapshot::new(launched, None, vec![old]);
        app.hold_idle_clock(&snap, launched + Duration::seconds(5));
        assert_eq!(app.last_used_at(), launched);
    }

    #[test]
    fn remaining_counts_down_and_rounds_up() {
        let start = Utc::now();
        let app = MonitoredApp::new(PATH, settings(10), start);
        assert_eq!(app.remaining_secs(start), 10);
        assert_eq!(app.remaining_secs(start + Duration::milliseconds(9_500)), 1);
        assert_eq!(app.remaining_secs(start + Duration::seconds(10)), 0);
        assert_eq!(app.remaining_secs(start + Duration::seconds(60)), 0);
    }

    #[test]
    fn display_name_prefers_process_name() {
        let start = Utc::now();
        let app = MonitoredApp::new(PATH, settings(10), start);
        assert_eq!(app.display_name(&ProcessSnapshot::empty(start)), "Notes");

        let mut proc_info = RunningProcessInfo::new(42, PATH);
        proc_info.name = Some("Notes Pro".into());
        let snap = ProcessSnapshot::new(start, None, vec![proc_info]);
        assert_eq!(app.display_name(&snap), "Notes Pro");
    }
}
