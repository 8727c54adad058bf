use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::FileBounds;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("No job available")]
    NoJob,
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

/// Lifecycle status of a print job.
///
/// `Started`, `Resumed` and `Paused` are active. `Cancelled`, `Failed` and
/// `Finished` are terminal: no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Started,
    Paused,
    Resumed,
    Cancelled,
    Failed,
    Finished,
}

impl JobStatus {
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Started | JobStatus::Resumed | JobStatus::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Finished | JobStatus::Cancelled | JobStatus::Failed)
    }

    /// Checks a transition from `self` to `next`.
    pub fn transition(self, next: JobStatus) -> Result<JobStatus, JobError> {
        if self.is_terminal() {
            return Err(JobError::InvalidTransition(format!(
                "job is already {:?}, cannot become {:?}",
                self, next
            )));
        }
        match (self, next) {
            (_, JobStatus::Started) => Err(JobError::InvalidTransition(
                "a running job cannot be started again".to_string(),
            )),
            (JobStatus::Paused, JobStatus::Paused) => {
                Err(JobError::InvalidTransition("job is already paused".to_string()))
            }
            (JobStatus::Started | JobStatus::Resumed, JobStatus::Resumed) => {
                Err(JobError::InvalidTransition("job is not paused".to_string()))
            }
            (_, next) => Ok(next),
        }
    }
}

/// A single print attempt as seen by the watchdog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub file_name: String,
    pub status: JobStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Material override for this job; the configured default applies when `None`.
    pub material: Option<String>,
    pub bounds: Option<FileBounds>,
}

impl Job {
    pub fn new(id: impl Into<String>, file_name: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            file_name: file_name.into(),
            status: JobStatus::Started,
            start_time,
            end_time: None,
            material: None,
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, bounds: FileBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_material(mut self, material: impl Into<String>) -> Self {
        self.material = Some(material.into());
        self
    }

    /// The later of start and end time. Used as the reference point for how
    /// long a paused job has been sitting.
    pub fn last_transition_time(&self) -> DateTime<Utc> {
        match self.end_time {
            Some(end) if end > self.start_time => end,
            _ => self.start_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_status_classification() {
        for status in [JobStatus::Started, JobStatus::Resumed, JobStatus::Paused] {
            assert!(status.is_active());
            assert!(!status.is_terminal());
        }
        for status in [JobStatus::Cancelled, JobStatus::Failed, JobStatus::Finished] {
            assert!(status.is_terminal());
            assert!(!status.is_active());
        }
    }

    #[test]
    fn test_valid_transitions() {
        assert_eq!(JobStatus::Started.transition(JobStatus::Paused).unwrap(), JobStatus::Paused);
        assert_eq!(JobStatus::Paused.transition(JobStatus::Resumed).unwrap(), JobStatus::Resumed);
        assert_eq!(JobStatus::Resumed.transition(JobStatus::Finished).unwrap(), JobStatus::Finished);
        assert_eq!(JobStatus::Paused.transition(JobStatus::Cancelled).unwrap(), JobStatus::Cancelled);
    }

    #[test]
    fn test_terminal_status_rejects_transitions() {
        let err = JobStatus::Finished.transition(JobStatus::Resumed).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition(_)));
        let err = JobStatus::Cancelled.transition(JobStatus::Failed).unwrap_err();
        assert!(matches!(err, JobError::InvalidTransition(_)));
    }

    #[test]
    fn test_resume_requires_pause() {
        assert!(JobStatus::Started.transition(JobStatus::Resumed).is_err());
        assert!(JobStatus::Paused.transition(JobStatus::Paused).is_err());
    }

    #[test]
    fn test_last_transition_time_prefers_later_end() {
        let start = Utc::now() - Duration::hours(3);
        let mut job = Job::new("1", "cube.gcode", start);
        assert_eq!(job.last_transition_time(), start);
        let paused_at = start + Duration::hours(1);
        job.end_time = Some(paused_at);
        assert_eq!(job.last_transition_time(), paused_at);
    }
}
