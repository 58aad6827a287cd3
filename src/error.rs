use thiserror::Error;

use crate::process::TerminateMode;

/// Failures raised by the monitoring engine.
///
/// None of these are fatal to the monitor loop: a failed query or kill is
/// logged and the next cycle simply tries again.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("process query failed: {reason}")]
    TransientQuery { reason: String },

    #[error("could not send {mode} terminate to pid {pid}: {reason}")]
    SignalSend {
        pid: u32,
        mode: TerminateMode,
        reason: String,
    },

    #[error("{install_path} was not closed; survivors {survivors:?}")]
    TerminationFailed {
        install_path: String,
        survivors: Vec<u32>,
    },

    #[error("Invalid {field}: {reason}")]
    InvalidSettings { field: &'static str, reason: String },
}

impl MonitorError {
    pub fn query(reason: impl Into<String>) -> Self {
        Self::TransientQuery {
            reason: reason.into(),
        }
    }

    pub fn signal(pid: u32, mode: TerminateMode, reason: impl Into<String>) -> Self {
        Self::SignalSend {
            pid,
            mode,
            reason: reason.into(),
        }
    }
}
