//! Operator control plane over HTTP.

pub mod api;
pub mod models;

pub use api::{AppState, AppStateInner, create_router};
