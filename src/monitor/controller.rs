use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::info;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::settings::MonitorSettings;

use super::{Monitor, MonitorStatus};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Starts and stops the background monitoring loop.
pub struct MonitorController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    settings_tx: Option<mpsc::UnboundedSender<MonitorSettings>>,
    tick_interval: Duration,
}

impl MonitorController {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            handle: None,
            cancel_token: None,
            settings_tx: None,
            tick_interval,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Moves `monitor` onto its own task and returns a status feed that
    /// changes once per completed cycle.
    pub fn start(&mut self, monitor: Monitor) -> Result<watch::Receiver<MonitorStatus>> {
        if self.handle.is_some() {
            bail!("monitor already running");
        }

        let status_rx = monitor.subscribe();
        let cancel_token = CancellationToken::new();
        let (settings_tx, settings_rx) = mpsc::unbounded_channel();

        let handle = tokio::spawn(monitor_loop(
            monitor,
            self.tick_interval,
            settings_rx,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        self.settings_tx = Some(settings_tx);
        Ok(status_rx)
    }

    /// Hands new settings to the loop; they take effect before the next cycle.
    pub fn update_settings(&self, settings: MonitorSettings) -> Result<()> {
        settings.validate()?;
        let tx = self
            .settings_tx
            .as_ref()
            .ok_or_else(|| anyhow!("monitor is not running"))?;
        tx.send(settings)
            .map_err(|_| anyhow!("monitor loop has exited"))
    }

    /// Cancels the loop and waits for the in-flight cycle to finish.
    pub async fn stop(&mut self) -> Result<()> {
        self.settings_tx = None;
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle.await.context("monitor loop task failed to join")
        } else {
            Ok(())
        }
    }
}

impl Default for MonitorController {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

async fn monitor_loop(
    mut monitor: Monitor,
    tick_interval: Duration,
    mut settings_rx: mpsc::UnboundedReceiver<MonitorSettings>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(tick_interval);
    // A slow termination pushes the next cycle back rather than bunching ticks up.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "monitor loop started: {} app(s), every {:?}",
        monitor.apps().len(),
        tick_interval
    );

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("monitor loop shutting down");
                break;
            }
            Some(settings) = settings_rx.recv() => {
                monitor.apply_settings(settings, Utc::now());
            }
            _ = ticker.tick() => {
                monitor.run_cycle(Utc::now()).await;
            }
        }
    }
}
