pub mod error;
pub mod monitor;
pub mod process;
pub mod ranking;
pub mod settings;
pub mod termination;
pub mod tracker;
mod utils;

use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, MissedTickBehavior};

use monitor::{AppState, Monitor, MonitorController, MonitorStatus};
use process::{NativeProcessSource, ProcessSnapshotSource};
use settings::SettingsStore;
use termination::TerminationConfig;

const SETTINGS_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub fn run() -> Result<()> {
    // Initialize logging (RUST_LOG overrides the default level)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("idlequit starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(serve())
}

async fn serve() -> Result<()> {
    let store = SettingsStore::new(SettingsStore::default_path()?)?;
    info!("settings loaded from {}", store.path().display());

    let source: Arc<dyn ProcessSnapshotSource> = Arc::new(NativeProcessSource::new());
    let monitor = Monitor::new(store.current(), source, TerminationConfig::default());

    let mut controller = MonitorController::default();
    let status_rx = controller.start(monitor)?;
    let reporter = tokio::spawn(report_status(status_rx));

    let mut settings_ticker = tokio::time::interval(SETTINGS_POLL_INTERVAL);
    settings_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_modified = store.modified_at();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("failed to listen for ctrl-c")?;
                info!("shutdown requested");
                break;
            }
            _ = settings_ticker.tick() => {
                let modified = store.modified_at();
                if modified == last_modified {
                    continue;
                }
                last_modified = modified;
                match store.reload() {
                    Ok(settings) => {
                        if let Err(err) = controller.update_settings(settings) {
                            warn!("new settings not applied: {err:#}");
                        }
                    }
                    Err(err) => warn!("settings reload failed: {err:#}"),
                }
            }
        }
    }

    controller.stop().await?;
    reporter.abort();
    Ok(())
}

/// Logs the interesting parts of each cycle; stands in for a status menu.
async fn report_status(mut rx: watch::Receiver<MonitorStatus>) {
    let mut last_states: Vec<(String, AppState)> = Vec::new();

    while rx.changed().await.is_ok() {
        let status = rx.borrow_and_update().clone();

        for path in &status.terminated {
            info!("closed idle app {path}");
        }
        for path in &status.failed {
            warn!("could not close {path}; will retry");
        }

        let states: Vec<(String, AppState)> = status
            .apps
            .iter()
            .map(|a| (a.display_name.clone(), a.state))
            .collect();
        if states != last_states {
            for app in &status.apps {
                info!(
                    "{:<24} {:?} ({}s left)",
                    app.display_name, app.state, app.remaining_secs
                );
            }
            last_states = states;
        }
    }
}
