//! Async interfaces to everything the watchdog does not own: the printer's
//! telemetry and command paths, the job store, the command history of the
//! serial link and the notification transports.
//!
//! Every method returns a `Result` so a single unreachable collaborator can be
//! contained by the caller instead of tearing down the sampling loop.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::FileBounds;
use crate::job::Job;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Unavailable: {0}")]
    Unavailable(String),
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Read-only printer sensors.
#[async_trait]
pub trait Telemetry: Send + Sync {
    async fn nozzle_temperature(&self) -> Result<f64, CollaboratorError>;
    async fn bed_temperature(&self) -> Result<f64, CollaboratorError>;
}

/// Write path to the printer. Acknowledgement is best-effort: `Ok` means the
/// controller accepted the request, not that the motion completed.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn pause(&self) -> Result<(), CollaboratorError>;
    async fn resume(&self) -> Result<(), CollaboratorError>;
    async fn cancel(&self) -> Result<(), CollaboratorError>;
    async fn send_command(&self, command: &str) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait JobSource: Send + Sync {
    /// The job under supervision: the most recently started one, whatever
    /// its status. `None` before the first job.
    async fn active_job(&self) -> Result<Option<Job>, CollaboratorError>;

    fn file_bounds(&self, job: &Job) -> Option<FileBounds> {
        job.bounds
    }
}

/// Source of the commands the printer has actually received.
#[async_trait]
pub trait CommandHistory: Send + Sync {
    /// Most recent command that was sent, acknowledged by the printer and
    /// appears in `source` (the job's file, one entry per line).
    async fn most_recent_acknowledged_command(&self, source: &[String]) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Email,
    Chat,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: AlertChannel, message: &str) -> Result<(), CollaboratorError>;
}
