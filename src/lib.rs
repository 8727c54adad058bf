//! printwatch: a print-integrity watchdog for a single 3D printer.
//!
//! The [`watchdog::Supervisor`] samples telemetry once per tick, checks the
//! head against the job file's travel envelope and the nozzle against the
//! material's temperature window, and pauses, lifts, cancels or alerts on
//! its own. [`recovery`] finds a safe point in the job file to resume from
//! and replays commands in throttled batches. [`jobs::JobTracker`] turns
//! printer lifecycle events into job records and switches the watchdog on
//! and off with each job. [`web`] exposes the operator recovery actions.

pub mod alerts;
pub mod gcode_store;
pub mod jobs;
pub mod recovery;
pub mod temperature_hold;
pub mod watchdog;
pub mod web;

pub use alerts::{AlertDispatcher, LogNotifier};
pub use gcode_store::GcodeStore;
pub use jobs::{JobRegistry, JobTracker};
pub use temperature_hold::TemperatureHold;
pub use watchdog::{Collaborators, Phase, Supervisor, WatchdogError, WatchdogSnapshot, WatchdogState};
