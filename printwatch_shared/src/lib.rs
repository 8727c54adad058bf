// printwatch_shared: types and collaborator traits shared by the watchdog and the simulator

pub mod collaborators;
pub mod config;
pub mod events;
pub mod geometry;
pub mod job;

pub use collaborators::{
    Actuator, AlertChannel, CollaboratorError, CommandHistory, JobSource, Notifier, Telemetry,
};
pub use config::{BoundsMinimum, Config, ConfigError, MaterialProfile, OutOfBoundsAction};
pub use events::LifecycleEvent;
pub use geometry::{Extent, FileBounds, Position};
pub use job::{Job, JobError, JobStatus};
