// Fakes and a ready-wired supervisor shared by the integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use printwatch::{Collaborators, JobRegistry, Supervisor};
use printwatch_shared::{
    AlertChannel, CollaboratorError, CommandHistory, Config, Extent, FileBounds, Job, JobSource, Notifier,
    Position,
};
use printwatch_simulator::{SimCommand, SimulatedPrinter};
use tempfile::TempDir;

pub const JOB_FILE: &str = "part.gcode";
pub const JOB_LINES: [&str; 4] = ["G28", "G1 X10", "G1 X20", "G1 X30"];

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(AlertChannel, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(AlertChannel, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, channel: AlertChannel, needle: &str) -> usize {
        self.messages()
            .iter()
            .filter(|(c, m)| *c == channel && m.contains(needle))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, channel: AlertChannel, message: &str) -> Result<(), CollaboratorError> {
        self.sent.lock().unwrap().push((channel, message.to_string()));
        Ok(())
    }
}

/// History that always reports the same command.
pub struct FixedHistory(pub Option<String>);

#[async_trait]
impl CommandHistory for FixedHistory {
    async fn most_recent_acknowledged_command(&self, _source: &[String]) -> Option<String> {
        self.0.clone()
    }
}

/// Job source whose job the test edits directly.
#[derive(Default)]
pub struct StaticJobs(pub Mutex<Option<Job>>);

#[async_trait]
impl JobSource for StaticJobs {
    async fn active_job(&self) -> Result<Option<Job>, CollaboratorError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

pub fn bounds() -> FileBounds {
    FileBounds::from_travel(Extent::new(
        Position::new(10.0, 10.0, 0.2),
        Position::new(200.0, 200.0, 100.0),
    ))
}

pub fn job() -> Job {
    Job::new("job-1", JOB_FILE, Utc::now()).with_bounds(bounds())
}

pub struct Harness {
    pub printer: SimulatedPrinter,
    pub registry: JobRegistry,
    pub notifier: Arc<RecordingNotifier>,
    pub supervisor: Arc<Supervisor>,
    pub config: Config,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|_| {}, Some("G1 X10"))
    }

    pub fn with(configure: impl FnOnce(&mut Config), last_acknowledged: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(JOB_FILE), JOB_LINES.join("\n")).unwrap();
        let mut config = Config::default();
        config.storage.gcode_dir = dir.path().to_path_buf();
        configure(&mut config);

        let printer = SimulatedPrinter::new();
        let registry = JobRegistry::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let collaborators = Collaborators {
            telemetry: Arc::new(printer.clone()),
            actuator: Arc::new(printer.clone()),
            jobs: Arc::new(registry.clone()),
            history: Arc::new(FixedHistory(last_acknowledged.map(str::to_string))),
            notifier: notifier.clone(),
        };
        let supervisor = Arc::new(Supervisor::new(&config, collaborators));
        Self { printer, registry, notifier, supervisor, config, dir }
    }

    /// Start a job with bounds and turn the watchdog on.
    pub async fn start_job(&self) -> Job {
        let job = self.registry.start(JOB_FILE, Some(bounds())).await;
        self.supervisor.enable().await;
        job
    }

    /// Start a job and get past heating with the head inside the bounds.
    pub async fn start_printing(&self) -> Job {
        let job = self.start_job().await;
        self.printer.set_nozzle_temperature(205.0);
        self.move_head(100.0, 100.0, 5.0);
        self.supervisor.tick().await;
        job
    }

    pub fn move_head(&self, x: f64, y: f64, z: f64) {
        self.printer.set_position(Position::new(x, y, z));
        self.supervisor.update_position(x, y, z);
    }

    pub fn count(&self, command: &SimCommand) -> usize {
        self.printer.commands().iter().filter(|c| *c == command).count()
    }

    pub fn gcodes(&self) -> Vec<String> {
        self.printer
            .commands()
            .into_iter()
            .filter_map(|c| match c {
                SimCommand::Gcode(g) => Some(g),
                _ => None,
            })
            .collect()
    }
}
