// Simulated printer: telemetry, command execution and lifecycle events

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use printwatch_shared::{
    Actuator, CollaboratorError, FileBounds, LifecycleEvent, Position, Telemetry,
};
use tokio::sync::{broadcast, mpsc};

use crate::thermal::{HeaterState, ThermistorState, AMBIENT_TEMP};

/// An actuator call as received by the simulated controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SimCommand {
    Pause,
    Resume,
    Cancel,
    Gcode(String),
}

/// Faults that can be switched on to exercise failure handling.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    pub telemetry: bool,
    pub actuator: bool,
}

#[derive(Debug)]
struct SimState {
    heater: HeaterState,
    thermistor: ThermistorState,
    bed_temp: f64,
    position: Position,
    relative: bool,
    printing: bool,
    paused: bool,
    cancelled: bool,
    commands: Vec<SimCommand>,
    faults: Faults,
    serial_log: Option<PathBuf>,
    line_number: u64,
}

#[derive(Clone)]
pub struct SimulatedPrinter {
    state: Arc<Mutex<SimState>>,
    events: Option<mpsc::UnboundedSender<LifecycleEvent>>,
}

impl Default for SimulatedPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPrinter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                heater: HeaterState::new(AMBIENT_TEMP),
                thermistor: ThermistorState::new(AMBIENT_TEMP, 0.0),
                bed_temp: AMBIENT_TEMP,
                position: Position::default(),
                relative: false,
                printing: false,
                paused: false,
                cancelled: false,
                commands: Vec::new(),
                faults: Faults::default(),
                serial_log: None,
                line_number: 0,
            })),
            events: None,
        }
    }

    /// Publish lifecycle events (pause, resume, cancel, position) on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<LifecycleEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Append an OctoPrint-style serial transcript to `path`.
    pub fn with_serial_log(self, path: impl Into<PathBuf>) -> Self {
        self.lock().serial_log = Some(path.into());
        self
    }

    pub fn with_sensor_noise(self, noise: f64) -> Self {
        self.lock().thermistor.noise = noise;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Some(tx) = &self.events {
            if tx.send(event).is_err() {
                tracing::debug!("Lifecycle event receiver dropped");
            }
        }
    }

    /// Force both the true and the measured nozzle temperature.
    pub fn set_nozzle_temperature(&self, temperature: f64) {
        let mut state = self.lock();
        state.heater.current_temp = temperature;
        state.thermistor.measured_temp = temperature;
    }

    pub fn nozzle_target(&self) -> f64 {
        self.lock().heater.target_temp
    }

    pub fn set_position(&self, position: Position) {
        self.lock().position = position;
    }

    pub fn position(&self) -> Position {
        self.lock().position
    }

    pub fn set_faults(&self, faults: Faults) {
        self.lock().faults = faults;
    }

    /// Every actuator call received so far, failed ones included.
    pub fn commands(&self) -> Vec<SimCommand> {
        self.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    pub fn start_print(&self, name: &str, bounds: Option<FileBounds>) {
        {
            let mut state = self.lock();
            state.printing = true;
            state.paused = false;
            state.cancelled = false;
        }
        tracing::info!("Simulated print started: {}", name);
        self.emit(LifecycleEvent::PrintStarted { name: name.to_string(), bounds });
    }

    pub fn finish_print(&self) {
        let was_printing = std::mem::replace(&mut self.lock().printing, false);
        if was_printing {
            self.emit(LifecycleEvent::PrintDone);
        }
    }

    /// Advance the thermal model by `dt`.
    pub fn step(&self, dt: Duration) {
        let dt = dt.as_secs_f64();
        let mut state = self.lock();
        state.heater.update(dt, AMBIENT_TEMP);
        let true_temp = state.heater.current_temp;
        state.thermistor.update(true_temp, dt);
    }

    /// Run the thermal model until shutdown.
    pub async fn run_physics(&self, period: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Simulator physics loop shutting down");
                    break;
                }
                _ = interval.tick() => self.step(period),
            }
        }
    }

    /// Stream a G-code program into the printer, one line per `period`,
    /// holding while paused and stopping on cancel.
    pub async fn play(&self, lines: Vec<String>, period: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut next = 0;
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    let (paused, cancelled) = {
                        let state = self.lock();
                        (state.paused, state.cancelled)
                    };
                    if cancelled {
                        tracing::info!("Simulated print cancelled at line {}", next);
                        break;
                    }
                    if paused {
                        continue;
                    }
                    let Some(line) = lines.get(next) else {
                        self.finish_print();
                        break;
                    };
                    next += 1;
                    let line = line.trim();
                    if line.is_empty() || line.starts_with(';') {
                        continue;
                    }
                    self.feed(line);
                }
            }
        }
    }

    /// Execute one line as if it came from the print stream.
    pub fn feed(&self, line: &str) {
        let moved = {
            let mut state = self.lock();
            log_exchange(&mut state, line);
            execute(&mut state, line)
        };
        if let Some(p) = moved {
            self.emit(LifecycleEvent::PositionUpdate { x: p.x, y: p.y, z: p.z });
        }
    }

    fn record(&self, command: SimCommand) -> Result<(), CollaboratorError> {
        let mut state = self.lock();
        state.commands.push(command);
        if state.faults.actuator {
            return Err(CollaboratorError::Unavailable("simulated actuator fault".to_string()));
        }
        Ok(())
    }
}

/// Apply a G-code line to the machine state. Returns the new head position
/// when the line moved it.
fn execute(state: &mut SimState, line: &str) -> Option<Position> {
    let code = line.split(';').next().unwrap_or("").trim();
    let mut words = code.split_whitespace();
    let command = words.next()?.to_ascii_uppercase();
    let param = |letter: char| -> Option<f64> {
        code.split_whitespace()
            .skip(1)
            .find(|w| w.starts_with(letter) || w.starts_with(letter.to_ascii_lowercase()))
            .and_then(|w| w[1..].parse::<f64>().ok())
    };
    match command.as_str() {
        "G90" => state.relative = false,
        "G91" => state.relative = true,
        "G28" => {
            state.position = Position::default();
            return Some(state.position);
        }
        "G0" | "G1" => {
            let mut axes = state.position.axes();
            let mut moved = false;
            for (i, letter) in ['X', 'Y', 'Z'].into_iter().enumerate() {
                if let Some(value) = param(letter) {
                    axes[i] = if state.relative { axes[i] + value } else { value };
                    moved = true;
                }
            }
            if moved {
                state.position = Position::new(axes[0], axes[1], axes[2]);
                return Some(state.position);
            }
        }
        "M104" | "M109" => {
            if let Some(target) = param('S') {
                state.heater.target_temp = target;
            }
        }
        "M140" | "M190" => {
            if let Some(target) = param('S') {
                state.bed_temp = target;
            }
        }
        _ => tracing::trace!("Simulator ignoring {}", command),
    }
    None
}

/// Serial transcript line with line number and checksum, followed by the
/// controller's acknowledgement.
fn log_exchange(state: &mut SimState, line: &str) {
    let Some(path) = state.serial_log.clone() else {
        return;
    };
    state.line_number += 1;
    let numbered = format!("N{} {}", state.line_number, line);
    let checksum = numbered.bytes().fold(0u8, |acc, b| acc ^ b);
    let entry = format!("Send: {}*{}\nRecv: ok\n", numbered, checksum);
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .and_then(|mut file| file.write_all(entry.as_bytes()));
    if let Err(e) = written {
        tracing::warn!("Failed to write serial log {}: {}", path.display(), e);
    }
}

#[async_trait]
impl Telemetry for SimulatedPrinter {
    async fn nozzle_temperature(&self) -> Result<f64, CollaboratorError> {
        let state = self.lock();
        if state.faults.telemetry {
            return Err(CollaboratorError::Unavailable("simulated telemetry fault".to_string()));
        }
        Ok(state.thermistor.measured_temp)
    }

    async fn bed_temperature(&self) -> Result<f64, CollaboratorError> {
        let state = self.lock();
        if state.faults.telemetry {
            return Err(CollaboratorError::Unavailable("simulated telemetry fault".to_string()));
        }
        Ok(state.bed_temp)
    }
}

#[async_trait]
impl Actuator for SimulatedPrinter {
    async fn pause(&self) -> Result<(), CollaboratorError> {
        self.record(SimCommand::Pause)?;
        let newly_paused = {
            let mut state = self.lock();
            let newly = state.printing && !state.paused;
            state.paused = true;
            newly
        };
        if newly_paused {
            self.emit(LifecycleEvent::PrintPaused);
        }
        Ok(())
    }

    async fn resume(&self) -> Result<(), CollaboratorError> {
        self.record(SimCommand::Resume)?;
        let was_paused = std::mem::replace(&mut self.lock().paused, false);
        if was_paused {
            self.emit(LifecycleEvent::PrintResumed);
        }
        Ok(())
    }

    async fn cancel(&self) -> Result<(), CollaboratorError> {
        self.record(SimCommand::Cancel)?;
        let (was_printing, lifted) = {
            let mut state = self.lock();
            let was_printing = std::mem::replace(&mut state.printing, false);
            state.cancelled = true;
            state.paused = false;
            // Heater off, then clear the part by 10 mm.
            execute(&mut state, "M104 S0");
            execute(&mut state, "G91");
            let lifted = execute(&mut state, "G1 Z10 F300");
            execute(&mut state, "G90");
            (was_printing, lifted)
        };
        if let Some(p) = lifted {
            self.emit(LifecycleEvent::PositionUpdate { x: p.x, y: p.y, z: p.z });
        }
        if was_printing {
            self.emit(LifecycleEvent::PrintCancelled);
        }
        Ok(())
    }

    async fn send_command(&self, command: &str) -> Result<(), CollaboratorError> {
        self.record(SimCommand::Gcode(command.to_string()))?;
        self.feed(command);
        Ok(())
    }
}
