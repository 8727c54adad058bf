//! Finding a safe point to resume from, and replaying a file from there.
//!
//! A G-code file is handled as its lines. Markers are compared after
//! trimming and without regard to case, so `g1 x10 ` matches `G1 X10`.

pub mod batch;
pub mod history;
pub mod replay;

use printwatch_shared::CommandHistory;
use serde::Serialize;
use thiserror::Error;

pub use batch::{BatchSender, ReplayReport};
pub use history::SerialLogHistory;
pub use replay::{ReplayProgress, ReplayRunner};

/// Marker value when no safe point could be established.
pub const UNKNOWN: &str = "UNKNOWN";

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("G-code file not found: {0}")]
    FileNotFound(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Marker not found in file: {0}")]
    MarkerNotFound(String),
    #[error("No commands after marker: {0}")]
    NoCommandsAfterMarker(String),
    #[error("A replay is already running")]
    ReplayInProgress,
}

/// Last command known to have run safely, and the one to resume with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecoveryMarkers {
    pub last_legal: String,
    pub next_legal: String,
}

impl RecoveryMarkers {
    pub fn unknown() -> Self {
        Self {
            last_legal: UNKNOWN.to_string(),
            next_legal: UNKNOWN.to_string(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.next_legal != UNKNOWN
    }
}

pub fn is_unknown(command: &str) -> bool {
    command == UNKNOWN
}

pub fn commands_match(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn is_comment(line: &str) -> bool {
    line.trim_start().starts_with(';')
}

/// Index of the first line matching `marker`.
fn find_marker<S: AsRef<str>>(lines: &[S], marker: &str) -> Option<usize> {
    lines.iter().position(|line| commands_match(line.as_ref(), marker))
}

/// The first non-blank line after the first occurrence of `marker`, taken
/// as-is (comments included).
pub fn next_command_after<S: AsRef<str>>(lines: &[S], marker: &str) -> Option<String> {
    let start = find_marker(lines, marker)?;
    lines[start + 1..]
        .iter()
        .map(|line| line.as_ref().trim())
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Every command after `marker`, trimmed, with blank and comment lines dropped.
pub fn commands_after<S: AsRef<str>>(lines: &[S], marker: &str) -> Result<Vec<String>, RecoveryError> {
    let start = find_marker(lines, marker)
        .ok_or_else(|| RecoveryError::MarkerNotFound(marker.trim().to_string()))?;
    let commands: Vec<String> = lines[start + 1..]
        .iter()
        .map(|line| line.as_ref().trim())
        .filter(|line| !line.is_empty() && !is_comment(line))
        .map(str::to_string)
        .collect();
    if commands.is_empty() {
        return Err(RecoveryError::NoCommandsAfterMarker(marker.trim().to_string()));
    }
    Ok(commands)
}

/// Markers for a job whose source file is `lines`. The last legal command
/// comes from the printer's command history; the next one is read from the
/// file. Either is [`UNKNOWN`] when it cannot be established.
pub async fn capture_markers(history: &dyn CommandHistory, lines: &[String]) -> RecoveryMarkers {
    let Some(last_legal) = history.most_recent_acknowledged_command(lines).await else {
        tracing::warn!("No acknowledged command from the job file found in history");
        return RecoveryMarkers::unknown();
    };
    let next_legal = next_command_after(lines, &last_legal).unwrap_or_else(|| {
        tracing::warn!("Nothing follows '{}' in the job file", last_legal);
        UNKNOWN.to_string()
    });
    RecoveryMarkers { last_legal, next_legal }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn file(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    struct FixedHistory(Option<&'static str>);

    #[async_trait]
    impl CommandHistory for FixedHistory {
        async fn most_recent_acknowledged_command(&self, _source: &[String]) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    #[test]
    fn test_next_command_after_marker() {
        let lines = file(&["G28", "G1 X10", "G1 X20", "G1 X30"]);
        assert_eq!(next_command_after(&lines, "G1 X10").as_deref(), Some("G1 X20"));
        assert_eq!(next_command_after(&lines, "  g1 x10 ").as_deref(), Some("G1 X20"));
        assert_eq!(next_command_after(&lines, "G1 X30"), None);
        assert_eq!(next_command_after(&lines, "G1 X99"), None);
    }

    #[test]
    fn test_next_command_skips_blank_lines_only() {
        let lines = file(&["G1 X10", "", "   ", "; layer 2", "G1 X20"]);
        assert_eq!(next_command_after(&lines, "G1 X10").as_deref(), Some("; layer 2"));
    }

    #[test]
    fn test_commands_after_drops_comments() {
        let lines = file(&["G28", "; start", "G1 X10", "  ;inline", "", "G1 X20 ", "M104 S0"]);
        let commands = commands_after(&lines, "g28").unwrap();
        assert_eq!(commands, vec!["G1 X10", "G1 X20", "M104 S0"]);
    }

    #[test]
    fn test_commands_after_errors() {
        let lines = file(&["G28", "G1 X10", "; end"]);
        assert!(matches!(commands_after(&lines, "G1 X99"), Err(RecoveryError::MarkerNotFound(_))));
        assert!(matches!(
            commands_after(&lines, "G1 X10"),
            Err(RecoveryError::NoCommandsAfterMarker(_))
        ));
    }

    #[tokio::test]
    async fn test_capture_markers() {
        let lines = file(&["G28", "G1 X10", "G1 X20", "G1 X30"]);
        let markers = capture_markers(&FixedHistory(Some("G1 X10")), &lines).await;
        assert_eq!(markers.last_legal, "G1 X10");
        assert_eq!(markers.next_legal, "G1 X20");
        assert!(markers.is_known());

        let markers = capture_markers(&FixedHistory(None), &lines).await;
        assert_eq!(markers, RecoveryMarkers::unknown());

        let markers = capture_markers(&FixedHistory(Some("G1 X30")), &lines).await;
        assert_eq!(markers.last_legal, "G1 X30");
        assert_eq!(markers.next_legal, UNKNOWN);
    }
}
