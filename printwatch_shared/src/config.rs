//! Watchdog configuration, loaded once at startup from a TOML file.
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration.
//!
//! ```toml
//! [watchdog]
//! material = "PETG"
//! max_pause_duration_hours = 4
//! out_of_bounds_action = "abort"
//! bounds_minimum = "zero"
//! allow_pause_lift = true
//!
//! [materials.PETG]
//! min_temp = 220.0
//! max_temp = 250.0
//!
//! [notify]
//! enable_email = true
//! enable_chat = false
//! email_recipients = ["ops@example.com"]
//!
//! [recovery]
//! batch_size = 10
//! batch_settle_ms = 3000
//! serial_log = "/var/log/printer/serial.log"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default = "default_materials")]
    pub materials: HashMap<String, MaterialProfile>,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub temperature_hold: TemperatureHoldConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watchdog: WatchdogConfig::default(),
            materials: default_materials(),
            notify: NotifyConfig::default(),
            recovery: RecoveryConfig::default(),
            temperature_hold: TemperatureHoldConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn material(&self, name: &str) -> Option<&MaterialProfile> {
        self.materials.get(name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, profile) in &self.materials {
            if profile.min_temp >= profile.max_temp {
                return Err(ConfigError::Invalid(format!(
                    "material '{}' has min_temp {} >= max_temp {}",
                    name, profile.min_temp, profile.max_temp
                )));
            }
        }
        if self.material(&self.watchdog.material).is_none() {
            return Err(ConfigError::Invalid(format!(
                "default material '{}' has no profile",
                self.watchdog.material
            )));
        }
        if self.recovery.batch_size == 0 {
            return Err(ConfigError::Invalid("recovery.batch_size must be > 0".to_string()));
        }
        if self.watchdog.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("watchdog.tick_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }
}

/// What the supervisor does when the head leaves the file's travel envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfBoundsAction {
    /// Pause, record recovery markers, then cancel the job.
    #[default]
    Abort,
    /// Pause and record recovery markers; the operator resumes from the
    /// next legal command.
    Pause,
}

/// Lower bound enforced per axis by the bounds check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundsMinimum {
    /// Machine origin: any negative coordinate is out of bounds.
    #[default]
    Zero,
    /// The file's recorded travel minimum.
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_max_pause_duration_hours")]
    pub max_pause_duration_hours: u32,
    /// Minimum spacing between repeated stale-pause alerts; 0 alerts on every tick.
    #[serde(default = "default_stale_pause_repeat_minutes")]
    pub stale_pause_repeat_minutes: u32,
    #[serde(default = "default_material")]
    pub material: String,
    #[serde(default)]
    pub out_of_bounds_action: OutOfBoundsAction,
    #[serde(default)]
    pub bounds_minimum: BoundsMinimum,
    /// While paused for temperature, accept Z up to the travel maximum plus
    /// `recovery.lift_mm`, so the head lift itself is not out of bounds.
    #[serde(default)]
    pub allow_pause_lift: bool,
    #[serde(default = "default_collaborator_timeout_ms")]
    pub collaborator_timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enable: true,
            tick_interval_ms: default_tick_interval_ms(),
            max_pause_duration_hours: default_max_pause_duration_hours(),
            stale_pause_repeat_minutes: default_stale_pause_repeat_minutes(),
            material: default_material(),
            out_of_bounds_action: OutOfBoundsAction::default(),
            bounds_minimum: BoundsMinimum::default(),
            allow_pause_lift: false,
            collaborator_timeout_ms: default_collaborator_timeout_ms(),
        }
    }
}

impl WatchdogConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn max_pause_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.max_pause_duration_hours))
    }

    pub fn stale_pause_repeat(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.stale_pause_repeat_minutes))
    }
}

/// Acceptable nozzle temperature window for a material, in °C.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct MaterialProfile {
    pub min_temp: f64,
    pub max_temp: f64,
}

impl MaterialProfile {
    pub fn new(min_temp: f64, max_temp: f64) -> Self {
        Self { min_temp, max_temp }
    }

    pub fn contains(&self, temperature: f64) -> bool {
        temperature >= self.min_temp && temperature <= self.max_temp
    }

    pub fn midpoint(&self) -> f64 {
        (self.min_temp + self.max_temp) / 2.0
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifyConfig {
    #[serde(default = "default_true")]
    pub enable_email: bool,
    #[serde(default = "default_true")]
    pub enable_chat: bool,
    #[serde(default)]
    pub email_recipients: Vec<String>,
    #[serde(default)]
    pub chat_recipients: Vec<String>,
    #[serde(default = "default_email_subject")]
    pub email_subject: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enable_email: true,
            enable_chat: true,
            email_recipients: Vec::new(),
            chat_recipients: Vec::new(),
            email_subject: default_email_subject(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecoveryConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_settle_ms")]
    pub batch_settle_ms: u64,
    /// How many trailing lines of the serial log are scanned for the last
    /// acknowledged command.
    #[serde(default = "default_history_lines")]
    pub history_lines: usize,
    #[serde(default)]
    pub serial_log: Option<PathBuf>,
    /// Relative Z lift applied after a temperature pause, in mm.
    #[serde(default = "default_lift_mm")]
    pub lift_mm: f64,
    #[serde(default = "default_z_feedrate")]
    pub z_feedrate: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_settle_ms: default_batch_settle_ms(),
            history_lines: default_history_lines(),
            serial_log: None,
            lift_mm: default_lift_mm(),
            z_feedrate: default_z_feedrate(),
        }
    }
}

impl RecoveryConfig {
    pub fn batch_settle(&self) -> Duration {
        Duration::from_millis(self.batch_settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemperatureHoldConfig {
    #[serde(default = "default_hold_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_hold_tolerance")]
    pub default_tolerance: f64,
}

impl Default for TemperatureHoldConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_hold_interval_ms(),
            default_tolerance: default_hold_tolerance(),
        }
    }
}

impl TemperatureHoldConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_gcode_dir")]
    pub gcode_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { gcode_dir: default_gcode_dir() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_materials() -> HashMap<String, MaterialProfile> {
    HashMap::from([
        ("PLA".to_string(), MaterialProfile::new(190.0, 220.0)),
        ("PETG".to_string(), MaterialProfile::new(220.0, 250.0)),
        ("ABS".to_string(), MaterialProfile::new(230.0, 260.0)),
    ])
}

fn default_true() -> bool { true }
fn default_tick_interval_ms() -> u64 { 1000 }
fn default_max_pause_duration_hours() -> u32 { 2 }
fn default_stale_pause_repeat_minutes() -> u32 { 30 }
fn default_material() -> String { "PLA".to_string() }
fn default_collaborator_timeout_ms() -> u64 { 5000 }
fn default_email_subject() -> String { "Print Error Alert".to_string() }
fn default_batch_size() -> usize { 10 }
fn default_batch_settle_ms() -> u64 { 3000 }
fn default_history_lines() -> usize { 500 }
fn default_lift_mm() -> f64 { 20.0 }
fn default_z_feedrate() -> f64 { 300.0 }
fn default_hold_interval_ms() -> u64 { 5000 }
fn default_hold_tolerance() -> f64 { 1.0 }
fn default_gcode_dir() -> PathBuf { PathBuf::from("gcode_files") }
fn default_bind() -> String { "0.0.0.0:3000".to_string() }
fn default_log_level() -> String { "info".to_string() }

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config: Config = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert!(config.watchdog.enable);
        assert_eq!(config.watchdog.tick_interval_ms, 1000);
        assert_eq!(config.watchdog.material, "PLA");
        assert_eq!(config.watchdog.out_of_bounds_action, OutOfBoundsAction::Abort);
        assert_eq!(config.watchdog.bounds_minimum, BoundsMinimum::Zero);
        assert!(!config.watchdog.allow_pause_lift);
        assert_eq!(config.recovery.batch_size, 10);
        assert_eq!(config.material("PLA"), Some(&MaterialProfile::new(190.0, 220.0)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("watchdog.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            "[watchdog]\nmaterial = 'PETG'\nout_of_bounds_action = 'pause'\nbounds_minimum = 'file'\n\n[materials.PETG]\nmin_temp = 225.0\nmax_temp = 245.0"
        )
        .unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.watchdog.material, "PETG");
        assert_eq!(config.watchdog.out_of_bounds_action, OutOfBoundsAction::Pause);
        assert_eq!(config.watchdog.bounds_minimum, BoundsMinimum::File);
        assert_eq!(config.material("PETG").unwrap().min_temp, 225.0);
        // An explicit table replaces the built-in profiles
        assert!(config.material("PLA").is_none());
        // Defaults for missing fields
        assert_eq!(config.watchdog.max_pause_duration_hours, 2);
        assert_eq!(config.recovery.batch_settle_ms, 3000);
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let mut config = Config::default();
        config.materials.insert("PLA".to_string(), MaterialProfile::new(230.0, 200.0));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_default_material() {
        let mut config = Config::default();
        config.watchdog.material = "NYLON".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_material_profile_window() {
        let pla = MaterialProfile::new(190.0, 220.0);
        assert!(pla.contains(190.0));
        assert!(pla.contains(220.0));
        assert!(!pla.contains(189.9));
        assert!(!pla.contains(220.1));
        assert_eq!(pla.midpoint(), 205.0);
    }
}
