use serde::{Deserialize, Serialize};

use crate::geometry::FileBounds;

/// Print lifecycle notifications coming from the printer controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum LifecycleEvent {
    PrintStarted {
        name: String,
        #[serde(default)]
        bounds: Option<FileBounds>,
    },
    PrintPaused,
    PrintResumed,
    PrintDone,
    PrintFailed,
    PrintCancelled,
    PositionUpdate { x: f64, y: f64, z: f64 },
}
