//! Shared application state: the room aggregate, live connections, and the
//! channels wiring the background tasks together.

pub mod catalog;
pub mod phase;
pub mod room;
mod sse;

use std::sync::Arc;

use axum::extract::ws::Message;
use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tracing::warn;

use crate::{config::AppConfig, state::room::{ConnId, Room}};

pub use self::sse::SseHub;

/// Shared handle to the application state.
pub type SharedState = Arc<AppState>;

/// Current wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Work item for the persister task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistJob {
    /// The room changed; flush a snapshot after the debounce window.
    Flush,
    /// A settlement landed; flush immediately and write a timestamped backup.
    Backup,
}

/// Handle used to push messages to one connected observer.
#[derive(Clone)]
pub struct Connection {
    /// Transport connection id.
    pub id: ConnId,
    /// Stable client identity presented at handshake.
    pub client_id: String,
    /// Team bound to this connection, once registered or resumed.
    pub team_id: Option<String>,
    /// Outbound message queue drained by the connection's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state storing the room, connections, and task handles.
pub struct AppState {
    config: AppConfig,
    room: Mutex<Room>,
    connections: DashMap<ConnId, Connection>,
    sse: SseHub,
    persist_tx: mpsc::UnboundedSender<PersistJob>,
}

impl AppState {
    /// Construct the shared state around an already hydrated room.
    pub fn new(
        config: AppConfig,
        room: Room,
        persist_tx: mpsc::UnboundedSender<PersistJob>,
    ) -> SharedState {
        Arc::new(Self {
            config,
            room: Mutex::new(room),
            connections: DashMap::new(),
            sse: SseHub::new(16),
            persist_tx,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Lock the room for a mutation or a consistent read.
    pub async fn room(&self) -> MutexGuard<'_, Room> {
        self.room.lock().await
    }

    /// Registry of active observer sockets keyed by connection id.
    pub fn connections(&self) -> &DashMap<ConnId, Connection> {
        &self.connections
    }

    /// Broadcast hub backing the read-only SSE stream.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }

    /// Tell the persister the room changed; it flushes on its own schedule.
    pub fn mark_dirty(&self) {
        if self.persist_tx.send(PersistJob::Flush).is_err() {
            warn!("persister task is gone; snapshot not scheduled");
        }
    }

    /// Request an immediate flush plus a timestamped backup.
    pub fn request_backup(&self) {
        if self.persist_tx.send(PersistJob::Backup).is_err() {
            warn!("persister task is gone; backup not scheduled");
        }
    }
}
