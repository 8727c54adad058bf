//! Software stand-in for a printer controller.
//!
//! [`SimulatedPrinter`] implements the telemetry and actuator interfaces the
//! watchdog consumes, keeps a log of every actuator call, writes a serial
//! transcript like a real host would, and publishes lifecycle events. It
//! backs `printwatch --simulate` and the integration tests.

pub mod printer;
pub mod thermal;

pub use printer::{Faults, SimCommand, SimulatedPrinter};
