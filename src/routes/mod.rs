//! HTTP route composition.

use axum::Router;

use crate::state::SharedState;

pub mod catalog;
pub mod health;
pub mod sse;
pub mod websocket;

/// Compose all route trees, wiring in shared state.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(sse::router())
        .merge(websocket::router())
        .merge(catalog::router())
        .with_state(state)
}
