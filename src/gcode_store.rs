// Lookup of job source files on disk
use std::path::{Path, PathBuf};

use printwatch_shared::{Extent, FileBounds, Position};
use tokio::fs;

use crate::recovery::RecoveryError;

/// Directory tree holding uploaded G-code files. Jobs refer to their file by
/// name only, so lookups search the whole tree.
#[derive(Debug, Clone)]
pub struct GcodeStore {
    root: PathBuf,
}

impl GcodeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find `file_name` anywhere under the root. Directories are searched
    /// breadth-first, so the shallowest match wins.
    pub async fn locate(&self, file_name: &str) -> Result<PathBuf, RecoveryError> {
        let mut pending = vec![self.root.clone()];
        while !pending.is_empty() {
            let mut subdirs = Vec::new();
            for dir in pending {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        tracing::debug!("Skipping {}: {}", dir.display(), e);
                        continue;
                    }
                };
                while let Some(entry) = entries.next_entry().await? {
                    let file_type = entry.file_type().await?;
                    if file_type.is_dir() {
                        subdirs.push(entry.path());
                    } else if entry.file_name().to_str() == Some(file_name) {
                        return Ok(entry.path());
                    }
                }
            }
            pending = subdirs;
        }
        Err(RecoveryError::FileNotFound(file_name.to_string()))
    }

    /// Read a job's file as lines.
    pub async fn read_lines(&self, file_name: &str) -> Result<Vec<String>, RecoveryError> {
        let path = self.locate(file_name).await?;
        let content = fs::read_to_string(&path).await?;
        Ok(content.lines().map(str::to_string).collect())
    }
}

fn word(code: &str, letter: char) -> Option<f64> {
    code.split_whitespace()
        .skip(1)
        .find(|w| w.starts_with(letter) || w.starts_with(letter.to_ascii_lowercase()))
        .and_then(|w| w[1..].parse().ok())
}

fn grow(extent: &mut Option<Extent>, p: Position) {
    let e = extent.get_or_insert(Extent::new(p, p));
    e.min = Position::new(e.min.x.min(p.x), e.min.y.min(p.y), e.min.z.min(p.z));
    e.max = Position::new(e.max.x.max(p.x), e.max.y.max(p.y), e.max.z.max(p.z));
}

/// Envelope of every position a program moves the head to. Moves that
/// extrude (positive `E` in absolute extrusion, any positive `E` delta in
/// relative) also count towards the model extent. `None` if nothing moves.
pub fn analyze_bounds<S: AsRef<str>>(lines: &[S]) -> Option<FileBounds> {
    let mut position = Position::default();
    let mut relative = false;
    let mut relative_e = false;
    let mut last_e = 0.0;
    let mut travel = None;
    let mut model = None;
    for line in lines {
        let code = line.as_ref().split(';').next().unwrap_or("").trim();
        let Some(command) = code.split_whitespace().next() else {
            continue;
        };
        match command.to_ascii_uppercase().as_str() {
            "G90" => relative = false,
            "G91" => relative = true,
            "M82" => relative_e = false,
            "M83" => relative_e = true,
            "G92" => {
                if let Some(e) = word(code, 'E') {
                    last_e = e;
                }
            }
            "G28" => position = Position::default(),
            "G0" | "G1" => {
                let mut axes = position.axes();
                let mut moved = false;
                for (i, letter) in ['X', 'Y', 'Z'].into_iter().enumerate() {
                    if let Some(v) = word(code, letter) {
                        axes[i] = if relative { axes[i] + v } else { v };
                        moved = true;
                    }
                }
                let extruding = match word(code, 'E') {
                    Some(e) if relative_e => e > 0.0,
                    Some(e) => {
                        let delta = e - last_e;
                        last_e = e;
                        delta > 0.0
                    }
                    None => false,
                };
                if moved {
                    position = Position::new(axes[0], axes[1], axes[2]);
                    grow(&mut travel, position);
                    if extruding {
                        grow(&mut model, position);
                    }
                }
            }
            _ => {}
        }
    }
    let travel = travel?;
    Some(FileBounds {
        model: model.unwrap_or(travel),
        travel,
    })
}
