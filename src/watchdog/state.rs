use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::recovery::{RecoveryMarkers, UNKNOWN};

/// Where the supervisor is in its per-job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Disabled,
    Heating,
    Normal,
    PausedTemperature,
    PausedPosition,
    Aborted,
}

/// Everything the supervisor remembers about the job it is watching.
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogState {
    pub enabled: bool,
    pub heating_mode: bool,
    pub print_failed: bool,
    pub paused_due_to_temperature: bool,
    pub paused_due_to_position: bool,
    pub paused_message_logged: bool,
    pub last_z_position: f64,
    pub last_legal_command: String,
    pub next_legal_command: String,
    pub canceled_by_supervisor: bool,
    /// Set once the job was cancelled for leaving its bounds.
    pub aborted: bool,
    /// The job's material has no profile and that was already logged.
    #[serde(skip)]
    pub missing_profile_logged: bool,
    #[serde(skip)]
    pub last_stale_alert: Option<DateTime<Utc>>,
}

impl Default for WatchdogState {
    fn default() -> Self {
        Self {
            enabled: false,
            heating_mode: true,
            print_failed: false,
            paused_due_to_temperature: false,
            paused_due_to_position: false,
            paused_message_logged: false,
            last_z_position: 0.0,
            last_legal_command: UNKNOWN.to_string(),
            next_legal_command: UNKNOWN.to_string(),
            canceled_by_supervisor: false,
            aborted: false,
            missing_profile_logged: false,
            last_stale_alert: None,
        }
    }
}

impl WatchdogState {
    /// Clean baseline for a new job, sampling on.
    pub fn reset_for_job(&mut self) {
        *self = Self {
            enabled: true,
            ..Self::default()
        };
    }

    pub fn set_markers(&mut self, markers: RecoveryMarkers) {
        self.last_legal_command = markers.last_legal;
        self.next_legal_command = markers.next_legal;
    }

    pub fn phase(&self) -> Phase {
        if self.aborted {
            Phase::Aborted
        } else if !self.enabled {
            Phase::Disabled
        } else if self.paused_due_to_temperature {
            Phase::PausedTemperature
        } else if self.paused_due_to_position {
            Phase::PausedPosition
        } else if self.heating_mode {
            Phase::Heating
        } else {
            Phase::Normal
        }
    }
}
