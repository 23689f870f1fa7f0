//! Observer WebSocket endpoint.

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use crate::{
    services::socket_service::{self, ConnectParams},
    state::SharedState,
};

/// Upgrade an observer connection and hand it to the socket service.
pub async fn ws_handler(
    State(shared_state): State<SharedState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket_service::handle_socket(shared_state, socket, params))
}

/// Configure the observer WebSocket subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/ws", get(ws_handler))
}
