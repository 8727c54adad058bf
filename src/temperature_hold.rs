//! Keeps the nozzle near a target temperature with a bang-bang loop, e.g.
//! while a print waits for the operator. At most one hold runs at a time.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use printwatch_shared::{Actuator, CollaboratorError, Telemetry};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HoldTarget {
    pub target: f64,
    pub tolerance: f64,
}

struct HoldTask {
    setpoint: HoldTarget,
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct TemperatureHold {
    telemetry: Arc<dyn Telemetry>,
    actuator: Arc<dyn Actuator>,
    period: Duration,
    timeout: Duration,
    task: Mutex<Option<HoldTask>>,
}

impl TemperatureHold {
    pub fn new(
        telemetry: Arc<dyn Telemetry>,
        actuator: Arc<dyn Actuator>,
        period: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            telemetry,
            actuator,
            period,
            timeout,
            task: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<HoldTask>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start holding `target` ± `tolerance`, replacing any running hold.
    pub fn start(&self, target: f64, tolerance: f64) {
        let setpoint = HoldTarget { target, tolerance };
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(hold_loop(
            self.telemetry.clone(),
            self.actuator.clone(),
            setpoint,
            self.period,
            self.timeout,
            stop_rx,
        ));
        let previous = self.lock().replace(HoldTask { setpoint, stop, handle });
        if let Some(previous) = previous {
            let _ = previous.stop.send(());
            tracing::info!("Replaced temperature hold at {}°C", previous.setpoint.target);
        }
        tracing::info!("Holding nozzle at {}°C ±{}", target, tolerance);
    }

    /// Stop the running hold. Returns whether one was running.
    pub fn stop(&self) -> bool {
        match self.lock().take() {
            Some(task) => {
                let _ = task.stop.send(());
                tracing::info!("Temperature hold stopped");
                !task.handle.is_finished()
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().as_ref().is_some_and(|task| !task.handle.is_finished())
    }

    pub fn setpoint(&self) -> Option<HoldTarget> {
        self.lock()
            .as_ref()
            .filter(|task| !task.handle.is_finished())
            .map(|task| task.setpoint)
    }
}

impl Drop for TemperatureHold {
    fn drop(&mut self) {
        if let Some(task) = self.lock().take() {
            task.handle.abort();
        }
    }
}

async fn hold_loop(
    telemetry: Arc<dyn Telemetry>,
    actuator: Arc<dyn Actuator>,
    setpoint: HoldTarget,
    period: Duration,
    timeout: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut heating = false;
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = interval.tick() => {
                let temperature = match tokio::time::timeout(timeout, telemetry.nozzle_temperature()).await {
                    Ok(Ok(temperature)) => temperature,
                    Ok(Err(e)) => {
                        tracing::warn!("Temperature hold: read failed: {}", e);
                        continue;
                    }
                    Err(_) => {
                        tracing::warn!("Temperature hold: read timed out after {:?}", timeout);
                        continue;
                    }
                };
                if temperature < setpoint.target - setpoint.tolerance && !heating {
                    if send(actuator.as_ref(), &format!("M104 S{}", setpoint.target), timeout).await {
                        heating = true;
                    }
                } else if temperature > setpoint.target + setpoint.tolerance && heating {
                    if send(actuator.as_ref(), "M104 S0", timeout).await {
                        heating = false;
                    }
                }
            }
        }
    }
}

async fn send(actuator: &dyn Actuator, command: &str, timeout: Duration) -> bool {
    let result = match tokio::time::timeout(timeout, actuator.send_command(command)).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(timeout)),
    };
    match result {
        Ok(()) => {
            tracing::debug!("Temperature hold: {}", command);
            true
        }
        Err(e) => {
            tracing::error!("Temperature hold: failed to send '{}': {}", command, e);
            false
        }
    }
}
