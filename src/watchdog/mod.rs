//! The print-integrity watchdog.
//!
//! [`Supervisor`] samples the printer once per tick and cross-checks head
//! position against the job file's travel envelope and nozzle temperature
//! against the material window. It pauses, lifts, cancels and alerts on its
//! own, and exposes the operator recovery actions used by the control API.
//!
//! All state lives behind one lock. `tick()` holds it for the whole cycle so
//! an operator action never interleaves with a half-applied decision. Head
//! position is kept outside the lock so position reports never wait.

pub mod classifier;
pub mod state;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use printwatch_shared::config::{RecoveryConfig, WatchdogConfig};
use printwatch_shared::{
    Actuator, CollaboratorError, CommandHistory, Config, Job, JobSource, JobStatus, MaterialProfile, Notifier,
    OutOfBoundsAction, Position, Telemetry,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;

use crate::alerts::AlertDispatcher;
use crate::gcode_store::GcodeStore;
use crate::recovery::{self, BatchSender, RecoveryError, RecoveryMarkers, ReplayProgress, ReplayReport, ReplayRunner};

pub use state::{Phase, WatchdogState};

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Next legal command is unknown; set one before resuming")]
    MarkerUnknown,
    #[error("No active job")]
    NoActiveJob,
    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),
    #[error("Printer error: {0}")]
    Collaborator(#[from] CollaboratorError),
}

/// External systems the supervisor talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub telemetry: Arc<dyn Telemetry>,
    pub actuator: Arc<dyn Actuator>,
    pub jobs: Arc<dyn JobSource>,
    pub history: Arc<dyn CommandHistory>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchdogSnapshot {
    pub phase: Phase,
    #[serde(flatten)]
    pub state: WatchdogState,
    pub position: Position,
}

pub struct Supervisor {
    settings: WatchdogConfig,
    materials: HashMap<String, MaterialProfile>,
    recovery: RecoveryConfig,
    state: Mutex<WatchdogState>,
    position: watch::Sender<Position>,
    enabled: watch::Sender<bool>,
    telemetry: Arc<dyn Telemetry>,
    actuator: Arc<dyn Actuator>,
    jobs: Arc<dyn JobSource>,
    history: Arc<dyn CommandHistory>,
    alerts: AlertDispatcher,
    store: GcodeStore,
    replays: ReplayRunner,
}

impl Supervisor {
    pub fn new(config: &Config, collaborators: Collaborators) -> Self {
        let timeout = config.watchdog.collaborator_timeout();
        let (position, _) = watch::channel(Position::default());
        let (enabled, _) = watch::channel(false);
        Self {
            settings: config.watchdog.clone(),
            materials: config.materials.clone(),
            recovery: config.recovery.clone(),
            state: Mutex::new(WatchdogState::default()),
            position,
            enabled,
            telemetry: collaborators.telemetry,
            replays: ReplayRunner::new(
                collaborators.actuator.clone(),
                BatchSender::from_config(&config.recovery, timeout),
            ),
            actuator: collaborators.actuator,
            jobs: collaborators.jobs,
            history: collaborators.history,
            alerts: AlertDispatcher::new(collaborators.notifier, &config.notify, timeout),
            store: GcodeStore::new(&config.storage.gcode_dir),
        }
    }

    pub fn alerts(&self) -> &AlertDispatcher {
        &self.alerts
    }

    /// Reset to a clean baseline and start checking. Called when a job starts.
    pub async fn enable(&self) {
        if !self.settings.enable {
            tracing::info!("Watchdog disabled in configuration; not supervising this job");
            return;
        }
        let mut state = self.state.lock().await;
        state.reset_for_job();
        self.enabled.send_replace(true);
        tracing::info!("Watchdog enabled");
    }

    /// Stop checking. Idempotent.
    pub async fn disable(&self) {
        let mut state = self.state.lock().await;
        if state.enabled {
            tracing::info!("Watchdog disabled");
        }
        state.enabled = false;
        self.enabled.send_replace(false);
    }

    pub fn update_position(&self, x: f64, y: f64, z: f64) {
        tracing::debug!(x, y, z, "Position update");
        self.position.send_replace(Position::new(x, y, z));
    }

    pub fn position(&self) -> Position {
        *self.position.borrow()
    }

    pub async fn snapshot(&self) -> WatchdogSnapshot {
        let state = self.state.lock().await.clone();
        WatchdogSnapshot {
            phase: state.phase(),
            state,
            position: self.position(),
        }
    }

    /// Whether the last cancel was ours. Clears the flag, so a cancel is
    /// attributed to the watchdog at most once.
    pub async fn take_canceled_by_supervisor(&self) -> bool {
        let mut state = self.state.lock().await;
        std::mem::replace(&mut state.canceled_by_supervisor, false)
    }

    /// Run `tick()` on the configured period until shutdown.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.tick_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Watchdog loop shutting down");
                        break;
                    }
                    _ = interval.tick() => self.tick().await,
                }
            }
        })
    }

    /// One sampling cycle. Never fails: every collaborator error degrades
    /// the affected check for this cycle only.
    pub async fn tick(&self) {
        let mut state = self.state.lock().await;
        if !state.enabled {
            return;
        }
        let job = match self.bounded(self.jobs.active_job()).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::debug!("No job to supervise");
                return;
            }
            Err(e) => {
                tracing::error!("Job lookup failed: {}", e);
                return;
            }
        };
        let temperature = match self.bounded(self.telemetry.nozzle_temperature()).await {
            Ok(temperature) => Some(temperature),
            Err(e) => {
                tracing::error!(job_id = %job.id, "Nozzle temperature unavailable: {}", e);
                None
            }
        };

        self.check_bounds(&mut state, &job).await;
        self.check_stale_pause(&mut state, &job).await;
        if let Some(temperature) = temperature {
            self.check_temperature(&mut state, &job, temperature).await;
        }
        if job.status == JobStatus::Failed && !state.print_failed {
            self.alert(&job, "Print failed!").await;
            state.print_failed = true;
        }
    }

    async fn check_bounds(&self, state: &mut WatchdogState, job: &Job) {
        if state.aborted || state.paused_due_to_position {
            return;
        }
        let Some(mut bounds) = self.jobs.file_bounds(job) else {
            return;
        };
        if state.paused_due_to_temperature && self.settings.allow_pause_lift {
            bounds.travel.max.z += self.recovery.lift_mm;
        }
        let position = self.position();
        let Some(violation) = classifier::check_position(&position, &bounds, self.settings.bounds_minimum) else {
            return;
        };
        tracing::warn!(
            job_id = %job.id,
            axis = %violation.axis,
            value = violation.value,
            limit = violation.limit,
            "Print head left the travel envelope"
        );
        let message = format!(
            "Print head out of bounds! X={} Y={} Z={}",
            position.x, position.y, position.z
        );
        self.alert(job, &message).await;

        if let Err(e) = self.bounded(self.actuator.pause()).await {
            tracing::error!("Failed to pause print: {}", e);
        }
        state.paused_due_to_position = true;
        let markers = self.capture_markers(job).await;
        if markers.is_known() {
            tracing::info!(
                "Last legal command: {} | next: {}",
                markers.last_legal,
                markers.next_legal
            );
        } else {
            tracing::warn!(job_id = %job.id, "No safe resume point; an operator must set the next command");
        }
        state.set_markers(markers);

        match self.settings.out_of_bounds_action {
            OutOfBoundsAction::Abort => {
                if let Err(e) = self.bounded(self.actuator.cancel()).await {
                    tracing::error!("Failed to cancel print: {}", e);
                }
                state.canceled_by_supervisor = true;
                state.aborted = true;
                tracing::warn!(job_id = %job.id, "Job aborted");
            }
            OutOfBoundsAction::Pause => {
                tracing::warn!(job_id = %job.id, "Print paused out of bounds. Waiting for operator.");
            }
        }
    }

    async fn capture_markers(&self, job: &Job) -> RecoveryMarkers {
        let lines = match self.store.read_lines(&job.file_name).await {
            Ok(lines) => lines,
            Err(e) => {
                tracing::warn!("Cannot scan job file for recovery markers: {}", e);
                return RecoveryMarkers::unknown();
            }
        };
        let limit = self.settings.collaborator_timeout();
        match tokio::time::timeout(limit, recovery::capture_markers(self.history.as_ref(), &lines)).await {
            Ok(markers) => markers,
            Err(_) => {
                tracing::warn!("Command history timed out after {:?}", limit);
                RecoveryMarkers::unknown()
            }
        }
    }

    async fn check_stale_pause(&self, state: &mut WatchdogState, job: &Job) {
        if job.status != JobStatus::Paused {
            state.last_stale_alert = None;
            return;
        }
        let now = Utc::now();
        if now - job.last_transition_time() < self.settings.max_pause_duration() {
            return;
        }
        if let Some(last) = state.last_stale_alert {
            if now - last < self.settings.stale_pause_repeat() {
                return;
            }
        }
        let message = format!(
            "Print paused for too long (>{}h)",
            self.settings.max_pause_duration_hours
        );
        self.alert(job, &message).await;
        state.last_stale_alert = Some(now);
    }

    async fn check_temperature(&self, state: &mut WatchdogState, job: &Job, temperature: f64) {
        if state.aborted {
            return;
        }
        let material = job.material.as_deref().unwrap_or(&self.settings.material);
        let Some(profile) = self.materials.get(material) else {
            if !state.missing_profile_logged {
                tracing::warn!(job_id = %job.id, "No temperature profile for material '{}'", material);
                state.missing_profile_logged = true;
            }
            return;
        };

        if state.heating_mode {
            if !classifier::heating_complete(temperature, profile) {
                tracing::debug!(temp = temperature, "Heating, temperature check skipped");
                return;
            }
            state.heating_mode = false;
            tracing::info!(temp = temperature, "Nozzle temperature stabilized for {}", material);
        }

        if state.paused_due_to_temperature {
            if !state.paused_message_logged {
                tracing::info!("Print paused due to temperature. Waiting for operator.");
                state.paused_message_logged = true;
            }
            return;
        }

        if let Some(anomaly) = classifier::check_temperature(temperature, profile) {
            tracing::warn!(job_id = %job.id, ?anomaly, "Temperature anomaly");
            let message = format!("Nozzle temperature out of range: {}°C", temperature);
            self.alert(job, &message).await;
            self.pause_for_temperature(state).await;
        }
    }

    /// Pause, then lift the head clear of the part. The Z height is only
    /// recorded when the pause was accepted.
    async fn pause_for_temperature(&self, state: &mut WatchdogState) {
        let paused = self.bounded(self.actuator.pause()).await;
        state.paused_due_to_temperature = true;
        if let Err(e) = paused {
            tracing::error!("Failed to pause print: {}", e);
            return;
        }
        state.last_z_position = self.position().z;
        tracing::info!("Stored last Z position: {}mm", state.last_z_position);

        if let Err(e) = self.send("G91").await {
            tracing::error!("Failed to raise print head: {}", e);
            return;
        }
        let lift = format!("G1 Z{} F{}", self.recovery.lift_mm, self.recovery.z_feedrate);
        for command in [lift.as_str(), "G90"] {
            if let Err(e) = self.send(command).await {
                tracing::error!("Failed to send '{}': {}", command, e);
            }
        }
        tracing::info!("Raised print head by {}mm", self.recovery.lift_mm);
    }

    /// Lower the head back to where it was paused and resume.
    pub async fn resume_from_temperature_pause(&self) -> Result<(), WatchdogError> {
        let mut state = self.state.lock().await;
        self.resume_temperature_pause(&mut state).await
    }

    async fn resume_temperature_pause(&self, state: &mut WatchdogState) -> Result<(), WatchdogError> {
        if !state.paused_due_to_temperature {
            return Err(WatchdogError::InvalidState(
                "print is not paused for temperature".to_string(),
            ));
        }
        state.paused_due_to_temperature = false;
        state.paused_message_logged = false;
        tracing::info!("Resuming print after temperature pause");

        if state.last_z_position > 0.0 {
            let restore = format!("G1 Z{} F{}", state.last_z_position, self.recovery.z_feedrate);
            match self.send(&restore).await {
                Ok(()) => tracing::info!("Restored print head to {}mm", state.last_z_position),
                Err(e) => tracing::error!("Failed to restore print head position: {}", e),
            }
        } else {
            tracing::warn!("No stored Z position, skipping restore");
        }
        self.resume_printer().await
    }

    /// Move to the next legal command, then resume.
    pub async fn resume_from_position_pause(&self) -> Result<(), WatchdogError> {
        let mut state = self.state.lock().await;
        if !state.paused_due_to_position {
            return Err(WatchdogError::InvalidState(
                "print is not paused for position".to_string(),
            ));
        }
        if state.aborted {
            return Err(WatchdogError::InvalidState(
                "job was aborted; replay from a marker instead".to_string(),
            ));
        }
        if recovery::is_unknown(&state.next_legal_command) {
            return Err(WatchdogError::MarkerUnknown);
        }
        state.paused_due_to_position = false;
        tracing::info!("Resuming print from out-of-bounds pause");

        let next = state.next_legal_command.clone();
        match self.send(&next).await {
            Ok(()) => tracing::info!("Moved to next legal command: {}", next),
            Err(e) => tracing::error!("Failed to move to next legal command: {}", e),
        }
        self.resume_printer().await
    }

    /// Override the resume command. Only allowed while position-paused.
    pub async fn set_next_legal_command(&self, command: &str) -> Result<(), WatchdogError> {
        let mut state = self.state.lock().await;
        if !state.paused_due_to_position {
            return Err(WatchdogError::InvalidState(
                "next legal command can only be set while paused for position".to_string(),
            ));
        }
        state.next_legal_command = command.trim().to_string();
        tracing::info!("Next legal command set to: {}", state.next_legal_command);
        Ok(())
    }

    pub async fn last_legal_command(&self) -> String {
        self.state.lock().await.last_legal_command.clone()
    }

    /// Operator "continue": undo a temperature pause if there is one,
    /// otherwise a plain resume.
    pub async fn continue_print(&self) -> Result<(), WatchdogError> {
        let mut state = self.state.lock().await;
        if state.paused_due_to_temperature {
            return self.resume_temperature_pause(&mut state).await;
        }
        drop(state);
        self.resume_printer().await
    }

    /// Heat the nozzle to the middle of the material window. Returns the
    /// target.
    pub async fn preheat(&self) -> Result<f64, WatchdogError> {
        let job = match self.bounded(self.jobs.active_job()).await {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!("Job lookup failed, preheating for default material: {}", e);
                None
            }
        };
        let material = job
            .and_then(|job| job.material)
            .unwrap_or_else(|| self.settings.material.clone());
        let profile = self
            .materials
            .get(&material)
            .ok_or_else(|| WatchdogError::InvalidState(format!("no profile for material '{}'", material)))?;
        let target = profile.midpoint();
        self.send(&format!("M104 S{}", target)).await?;
        tracing::info!("Preheating nozzle to {}°C for {}", target, material);
        Ok(target)
    }

    /// Start replaying every command after `marker` in the current job's
    /// file, in batches, as a background task. It runs to the end unless the
    /// watchdog is disabled meanwhile. Only one replay runs at a time.
    pub async fn start_replay(&self, marker: &str) -> Result<ReplayProgress, WatchdogError> {
        self.launch_replay(marker).await?;
        self.replays
            .status()
            .ok_or_else(|| WatchdogError::InvalidState("replay did not start".to_string()))
    }

    /// Like [`Supervisor::start_replay`], then wait for the final report.
    pub async fn replay_from(&self, marker: &str) -> Result<ReplayReport, WatchdogError> {
        let report = self.launch_replay(marker).await?;
        Ok(recovery::replay::finished(report).await)
    }

    /// The running replay, or the last one to finish.
    pub fn replay_status(&self) -> Option<ReplayProgress> {
        self.replays.status()
    }

    async fn launch_replay(&self, marker: &str) -> Result<watch::Receiver<ReplayReport>, WatchdogError> {
        if self.replays.is_running() {
            return Err(RecoveryError::ReplayInProgress.into());
        }
        let job = self.bounded(self.jobs.active_job()).await?.ok_or(WatchdogError::NoActiveJob)?;
        let lines = self.store.read_lines(&job.file_name).await?;
        let commands = recovery::commands_after(&lines, marker)?;
        tracing::info!(job_id = %job.id, "Replaying {} commands after '{}'", commands.len(), marker.trim());
        Ok(self.replays.start(marker, commands, self.enabled.subscribe())?)
    }

    async fn resume_printer(&self) -> Result<(), WatchdogError> {
        self.bounded(self.actuator.resume()).await.map_err(|e| {
            tracing::error!("Failed to resume print: {}", e);
            WatchdogError::from(e)
        })
    }

    async fn send(&self, command: &str) -> Result<(), CollaboratorError> {
        self.bounded(self.actuator.send_command(command)).await
    }

    async fn alert(&self, job: &Job, message: &str) {
        tracing::warn!(job_id = %job.id, "Error detected: {}", message);
        self.alerts.alert(message).await;
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, CollaboratorError> {
        let limit = self.settings.collaborator_timeout();
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(CollaboratorError::Timeout(limit)))
    }
}
