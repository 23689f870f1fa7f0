//! Spectator SSE endpoint.

use std::convert::Infallible;

use axum::{Router, extract::State, response::sse::Sse, routing::get};
use futures::Stream;
use tracing::{info, warn};

use crate::{dto::event::ServerEvent, services::sse_service, state::SharedState};

/// Stream the public room projection to spectators.
pub async fn events_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let (receiver, view) = sse_service::subscribe(&state).await;
    info!("new SSE spectator");
    let initial = match ServerEvent::json(Some("state".to_string()), &view) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(error = %err, "failed to serialize initial snapshot");
            None
        }
    };
    sse_service::to_sse_stream(initial, receiver)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/events", get(events_stream))
}
