//! Per-observer fan-out: every observable mutation ends with one call here,
//! inside the same critical section that made the change, so snapshot
//! versions reach each client in order.

use axum::extract::ws::Message;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{
    dto::{
        event::{ServerEvent, ServerMessage, SoldEvent},
        view::RoomView,
    },
    state::{SharedState, now_ms, room::Room},
};

/// Serialize a payload and push it onto a connection's writer queue.
pub fn send_message<T>(tx: &mpsc::UnboundedSender<Message>, value: &T)
where
    T: ?Sized + Serialize,
{
    match serde_json::to_string(value) {
        Ok(payload) => {
            let _ = tx.send(Message::Text(payload.into()));
        }
        Err(err) => warn!(error = %err, "failed to serialize outbound message"),
    }
}

/// Push a fresh per-observer snapshot to every connection and the public
/// projection to the SSE hub.
pub fn broadcast_room(state: &SharedState, room: &Room) {
    let now = now_ms();
    let targets: Vec<_> = state
        .connections()
        .iter()
        .map(|entry| (entry.id, entry.team_id.clone(), entry.tx.clone()))
        .collect();

    for (conn, team_id, tx) in targets {
        let view = RoomView::project(room, team_id.as_deref(), Some(conn), now);
        send_message(&tx, &ServerMessage::State(view));
    }

    let public = RoomView::project(room, None, None, now);
    match ServerEvent::json(Some("state".to_string()), &public) {
        Ok(event) => state.sse().broadcast(event),
        Err(err) => warn!(error = %err, "failed to serialize public snapshot"),
    }
}

/// Broadcast the room and schedule a snapshot flush. Every mutating handler
/// ends with this call.
pub fn publish(state: &SharedState, room: &Room) {
    broadcast_room(state, room);
    state.mark_dirty();
}

/// Fan a settled sale out to every connection and the SSE hub.
pub fn emit_sold(state: &SharedState, event: &SoldEvent) {
    let targets: Vec<_> = state
        .connections()
        .iter()
        .map(|entry| entry.tx.clone())
        .collect();
    for tx in targets {
        send_message(&tx, &ServerMessage::Sold(event.clone()));
    }
    match ServerEvent::json(Some("sold".to_string()), event) {
        Ok(sse_event) => state.sse().broadcast(sse_event),
        Err(err) => warn!(error = %err, "failed to serialize sold event"),
    }
}
