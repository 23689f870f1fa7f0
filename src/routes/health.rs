//! Liveness probe endpoint.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::state::SharedState;

/// Health probe payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Static status marker.
    pub status: &'static str,
    /// Current room state version.
    pub version: u64,
    /// Number of live observer connections.
    pub connections: usize,
}

/// Return the current health status of the backend.
pub async fn healthcheck(State(state): State<SharedState>) -> Json<HealthResponse> {
    let version = state.room().await.version;
    Json(HealthResponse {
        status: "ok",
        version,
        connections: state.connections().len(),
    })
}

/// Configure the health routes subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/healthcheck", get(healthcheck))
}
