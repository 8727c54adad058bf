use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn axes(&self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }
}

/// Axis-aligned box, min and max corner.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min: Position,
    pub max: Position,
}

impl Extent {
    pub fn new(min: Position, max: Position) -> Self {
        Self { min, max }
    }
}

/// Geometric envelope of a G-code file: the printed model and the full
/// travel path (including purge lines, skirt and moves between islands).
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FileBounds {
    pub model: Extent,
    pub travel: Extent,
}

impl FileBounds {
    pub fn from_travel(travel: Extent) -> Self {
        Self { model: travel, travel }
    }
}
