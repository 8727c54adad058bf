// Job bookkeeping driven by printer lifecycle events
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use printwatch_shared::{
    AlertChannel, CollaboratorError, FileBounds, Job, JobError, JobSource, JobStatus, LifecycleEvent,
};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::watchdog::Supervisor;

/// In-memory job list, newest last.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<Vec<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<Job> {
        self.jobs.read().await.last().cloned()
    }

    pub async fn all(&self) -> Vec<Job> {
        self.jobs.read().await.clone()
    }

    /// Record a new job. A previous job that never reached a terminal
    /// status is marked failed.
    pub async fn start(&self, file_name: &str, bounds: Option<FileBounds>) -> Job {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        if let Some(previous) = jobs.last_mut() {
            if previous.status.is_active() {
                tracing::warn!(job_id = %previous.id, "Previous job still active, marking it failed");
                previous.status = JobStatus::Failed;
                previous.end_time = Some(now);
            }
        }
        let mut job = Job::new(uuid::Uuid::new_v4().to_string(), file_name, now);
        job.bounds = bounds;
        jobs.push(job.clone());
        job
    }

    /// Move the current job to `status`. Pauses and terminal statuses record
    /// the transition time as end time.
    pub async fn update_status(&self, status: JobStatus) -> Result<Job, JobError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.last_mut().ok_or(JobError::NoJob)?;
        job.status = job.status.transition(status)?;
        if status == JobStatus::Paused || status.is_terminal() {
            job.end_time = Some(Utc::now());
        }
        Ok(job.clone())
    }
}

#[async_trait]
impl JobSource for JobRegistry {
    async fn active_job(&self) -> Result<Option<Job>, CollaboratorError> {
        Ok(self.current().await)
    }
}

/// Applies lifecycle events to the job registry and switches the watchdog
/// on and off with the job.
#[derive(Clone)]
pub struct JobTracker {
    registry: JobRegistry,
    supervisor: Arc<Supervisor>,
}

impl JobTracker {
    pub fn new(registry: JobRegistry, supervisor: Arc<Supervisor>) -> Self {
        Self { registry, supervisor }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    pub async fn handle(&self, event: LifecycleEvent) -> Result<(), JobError> {
        match event {
            LifecycleEvent::PrintStarted { name, bounds } => {
                let job = self.registry.start(&name, bounds).await;
                tracing::info!(job_id = %job.id, "Print started: {}", name);
                self.supervisor.enable().await;
            }
            LifecycleEvent::PrintPaused => {
                self.registry.update_status(JobStatus::Paused).await?;
            }
            LifecycleEvent::PrintResumed => {
                self.registry.update_status(JobStatus::Resumed).await?;
            }
            LifecycleEvent::PrintDone => self.finish(JobStatus::Finished).await?,
            LifecycleEvent::PrintFailed => self.finish(JobStatus::Failed).await?,
            LifecycleEvent::PrintCancelled => {
                // A cancel we issued ourselves is a failure of the print.
                let status = if self.supervisor.take_canceled_by_supervisor().await {
                    JobStatus::Failed
                } else {
                    JobStatus::Cancelled
                };
                self.finish(status).await?;
            }
            LifecycleEvent::PositionUpdate { x, y, z } => self.supervisor.update_position(x, y, z),
        }
        Ok(())
    }

    async fn finish(&self, status: JobStatus) -> Result<(), JobError> {
        let job = self.registry.update_status(status).await?;
        tracing::info!(job_id = %job.id, "Job {:?}", status);
        self.supervisor.disable().await;
        let notice = match status {
            JobStatus::Finished => "The print has finished",
            JobStatus::Failed => "The print has failed",
            _ => return Ok(()),
        };
        self.supervisor.alerts().notify(AlertChannel::Chat, notice).await;
        Ok(())
    }

    /// Apply events from `events` until shutdown or until the sender is gone.
    pub fn spawn(
        self,
        mut events: mpsc::UnboundedReceiver<LifecycleEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        if let Err(e) = self.handle(event).await {
                            tracing::warn!("Ignoring lifecycle event: {}", e);
                        }
                    }
                }
            }
            tracing::info!("Lifecycle event pump stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_job_fails_stale_active_job() {
        let registry = JobRegistry::new();
        let first = registry.start("a.gcode", None).await;
        let second = registry.start("b.gcode", None).await;
        let jobs = registry.all().await;
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, first.id);
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert!(jobs[0].end_time.is_some());
        assert_eq!(registry.current().await.unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_finished_job_is_not_failed_by_next_start() {
        let registry = JobRegistry::new();
        registry.start("a.gcode", None).await;
        registry.update_status(JobStatus::Finished).await.unwrap();
        registry.start("b.gcode", None).await;
        assert_eq!(registry.all().await[0].status, JobStatus::Finished);
    }

    #[tokio::test]
    async fn test_update_status_records_pause_time() {
        let registry = JobRegistry::new();
        let job = registry.start("a.gcode", None).await;
        let paused = registry.update_status(JobStatus::Paused).await.unwrap();
        assert!(paused.end_time.unwrap() >= job.start_time);
        let err = registry.update_status(JobStatus::Paused).await.unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn test_update_without_job() {
        let registry = JobRegistry::new();
        let err = registry.update_status(JobStatus::Finished).await.unwrap_err();
        assert!(matches!(err, JobError::NoJob));
    }
}
