use std::time::Duration;

use printwatch_shared::{Actuator, CollaboratorError};
use printwatch_shared::config::RecoveryConfig;
use tokio::sync::watch;

/// Outcome of a replay. Failed commands are counted, not retried.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReplayReport {
    pub batches: usize,
    pub sent: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// Sends commands in fixed-size groups with a settle pause between groups,
/// so the printer's command queue is never flooded.
#[derive(Debug, Clone)]
pub struct BatchSender {
    batch_size: usize,
    settle: Duration,
    timeout: Duration,
}

impl BatchSender {
    pub fn new(batch_size: usize, settle: Duration, timeout: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            settle,
            timeout,
        }
    }

    pub fn from_config(config: &RecoveryConfig, timeout: Duration) -> Self {
        Self::new(config.batch_size, config.batch_settle(), timeout)
    }

    /// Send `commands` in order. No pause follows the final batch.
    ///
    /// If `active` is given, replay stops before the next batch once it
    /// changes to `false`, cutting the settle pause short. A value that is
    /// already `false` when replay starts does not stop it.
    ///
    /// `progress`, if given, sees the running report after every command.
    pub async fn send(
        &self,
        actuator: &dyn Actuator,
        commands: &[String],
        mut active: Option<watch::Receiver<bool>>,
        progress: Option<&watch::Sender<ReplayReport>>,
    ) -> ReplayReport {
        let mut report = ReplayReport::default();
        let publish = |report: &ReplayReport| {
            if let Some(progress) = progress {
                progress.send_replace(report.clone());
            }
        };
        let total = commands.len().div_ceil(self.batch_size);
        for (index, batch) in commands.chunks(self.batch_size).enumerate() {
            if index > 0 && !self.settle(&mut active).await {
                tracing::warn!("Replay cancelled after {} of {} batches", index, total);
                report.cancelled = true;
                publish(&report);
                return report;
            }
            report.batches += 1;
            for command in batch {
                tracing::debug!("Replaying: {}", command);
                match self.send_one(actuator, command).await {
                    Ok(()) => report.sent += 1,
                    Err(e) => {
                        tracing::error!("Failed to send '{}': {}", command, e);
                        report.failed += 1;
                    }
                }
                publish(&report);
            }
            tracing::info!("Sent batch {}/{} ({} commands)", index + 1, total, batch.len());
        }
        tracing::info!("Replay complete: {} sent, {} failed", report.sent, report.failed);
        report
    }

    async fn send_one(&self, actuator: &dyn Actuator, command: &str) -> Result<(), CollaboratorError> {
        match tokio::time::timeout(self.timeout, actuator.send_command(command)).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout(self.timeout)),
        }
    }

    /// Wait out the settle interval. Returns whether replay should go on.
    async fn settle(&self, active: &mut Option<watch::Receiver<bool>>) -> bool {
        let sleep = tokio::time::sleep(self.settle);
        tokio::pin!(sleep);
        let Some(rx) = active else {
            sleep.await;
            return true;
        };
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Sender gone; nothing can cancel us any more.
                        (&mut sleep).await;
                        return true;
                    }
                    if !*rx.borrow_and_update() {
                        return false;
                    }
                }
            }
        }
    }
}
