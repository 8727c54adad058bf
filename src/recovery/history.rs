use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use async_trait::async_trait;
use printwatch_shared::CommandHistory;

/// Command history read from a printer host's serial log.
///
/// Each command written to the printer appears as a `Send:` line (possibly
/// with an `N<line>` prefix and `*<checksum>` suffix) and is acknowledged by a
/// later `Recv: ok`. Acknowledgements arrive in send order.
#[derive(Debug, Clone)]
pub struct SerialLogHistory {
    path: PathBuf,
    tail_lines: usize,
}

impl SerialLogHistory {
    pub fn new(path: impl Into<PathBuf>, tail_lines: usize) -> Self {
        Self {
            path: path.into(),
            tail_lines,
        }
    }
}

/// Strip line number and checksum framing from a sent command.
fn unframe(sent: &str) -> &str {
    let mut command = sent.trim();
    if let Some(rest) = command.strip_prefix('N') {
        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits > 0 && rest[digits..].starts_with(' ') {
            command = rest[digits..].trim_start();
        }
    }
    if let Some((body, checksum)) = command.rsplit_once('*') {
        if !checksum.is_empty() && checksum.chars().all(|c| c.is_ascii_digit()) {
            command = body.trim_end();
        }
    }
    command
}

fn normalize(command: &str) -> String {
    command.trim().to_ascii_lowercase()
}

/// Last acknowledged command of `log` that also appears in `source`.
pub(crate) fn last_acknowledged<'a>(log: impl Iterator<Item = &'a str>, source: &[String]) -> Option<String> {
    let known: HashSet<String> = source.iter().map(|line| normalize(line)).collect();
    // One entry per unacknowledged send; `None` for commands not in the file.
    let mut in_flight: VecDeque<Option<String>> = VecDeque::new();
    let mut last = None;
    for line in log {
        if let Some(idx) = line.find("Send: ") {
            let command = unframe(&line[idx + "Send: ".len()..]);
            let entry = known.contains(&normalize(command)).then(|| command.to_string());
            in_flight.push_back(entry);
        } else if line.contains("Recv: ok") {
            if let Some(Some(command)) = in_flight.pop_front() {
                last = Some(command);
            }
        }
    }
    last
}

#[async_trait]
impl CommandHistory for SerialLogHistory {
    async fn most_recent_acknowledged_command(&self, source: &[String]) -> Option<String> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Serial log {} unavailable: {}", self.path.display(), e);
                return None;
            }
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(self.tail_lines);
        last_acknowledged(lines[start..].iter().copied(), source)
    }
}
