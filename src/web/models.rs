//! Request and response bodies for the control API.

use serde::{Deserialize, Serialize};

/// A single G-code command, used for recovery markers.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandBody {
    pub command: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    pub marker: String,
}

#[derive(Debug, Deserialize)]
pub struct HoldRequest {
    pub target: f64,
    /// Falls back to the configured default when omitted.
    #[serde(default)]
    pub tolerance: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct HoldResponse {
    pub running: bool,
    pub target: Option<f64>,
    pub tolerance: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct PreheatResponse {
    pub target: f64,
}
