//! Background replay. At most one runs at a time, and it keeps going after
//! whoever started it has gone away.

use std::sync::{Arc, Mutex, MutexGuard};

use printwatch_shared::Actuator;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{BatchSender, RecoveryError, ReplayReport};

/// Where the latest replay stands. `report` is final once `running` is false.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayProgress {
    pub marker: String,
    pub total: usize,
    pub running: bool,
    #[serde(flatten)]
    pub report: ReplayReport,
}

struct ReplayTask {
    marker: String,
    total: usize,
    report: watch::Receiver<ReplayReport>,
    handle: JoinHandle<()>,
}

impl ReplayTask {
    /// The task holds the report sender until its last report is out.
    fn running(&self) -> bool {
        self.report.has_changed().is_ok()
    }
}

pub struct ReplayRunner {
    actuator: Arc<dyn Actuator>,
    sender: BatchSender,
    task: Mutex<Option<ReplayTask>>,
}

impl ReplayRunner {
    pub fn new(actuator: Arc<dyn Actuator>, sender: BatchSender) -> Self {
        Self {
            actuator,
            sender,
            task: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ReplayTask>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the replay of `commands`. It stops early only when `active`
    /// turns false. The returned receiver closes once the replay is over.
    pub fn start(
        &self,
        marker: &str,
        commands: Vec<String>,
        active: watch::Receiver<bool>,
    ) -> Result<watch::Receiver<ReplayReport>, RecoveryError> {
        let mut task = self.lock();
        if task.as_ref().is_some_and(ReplayTask::running) {
            return Err(RecoveryError::ReplayInProgress);
        }
        let marker = marker.trim().to_string();
        let total = commands.len();
        let (report_tx, report) = watch::channel(ReplayReport::default());
        let actuator = self.actuator.clone();
        let sender = self.sender.clone();
        let label = marker.clone();
        let handle = tokio::spawn(async move {
            let report = sender
                .send(actuator.as_ref(), &commands, Some(active), Some(&report_tx))
                .await;
            tracing::info!(
                "Replay from '{}' finished: {} of {} sent, {} failed{}",
                label,
                report.sent,
                total,
                report.failed,
                if report.cancelled { ", cancelled" } else { "" }
            );
            report_tx.send_replace(report);
        });
        *task = Some(ReplayTask {
            marker,
            total,
            report: report.clone(),
            handle,
        });
        Ok(report)
    }

    /// The running replay, or the last one to finish.
    pub fn status(&self) -> Option<ReplayProgress> {
        self.lock().as_ref().map(|task| ReplayProgress {
            marker: task.marker.clone(),
            total: task.total,
            running: task.running(),
            report: task.report.borrow().clone(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(ReplayTask::running)
    }
}

impl Drop for ReplayRunner {
    fn drop(&mut self) {
        if let Some(task) = self.lock().take() {
            task.handle.abort();
        }
    }
}

/// Wait for the replay behind `report` to end and return its final report.
pub async fn finished(mut report: watch::Receiver<ReplayReport>) -> ReplayReport {
    while report.changed().await.is_ok() {}
    report.borrow().clone()
}
