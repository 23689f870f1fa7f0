//! FantaBid backend binary entrypoint wiring the room, WebSocket, SSE, and
//! snapshot persistence layers.

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use tokio::{net::TcpListener, sync::mpsc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fantabid_back::{
    config::AppConfig,
    dao::snapshot_store::SnapshotStore,
    routes,
    services::{driver, persistence},
    state::{AppState, SharedState, now_ms, room::Room},
};

/// The single auction room this deployment serves.
const ROOM_ID: &str = "DEFAULT";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = SnapshotStore::new(&config.data_dir, config.max_backups)
        .context("opening the snapshot store")?;

    // A corrupt snapshot must fail startup loudly; silently starting from an
    // empty room would lose the auction.
    let room = match store.load(ROOM_ID).context("loading the room snapshot")? {
        Some(snapshot) => {
            info!(room = ROOM_ID, version = snapshot.version, "room restored from snapshot");
            snapshot.into_room(config.rules.clone(), now_ms())
        }
        None => {
            info!(room = ROOM_ID, "no snapshot found; starting a fresh room");
            Room::new(ROOM_ID, config.rules.clone(), now_ms())
        }
    };

    let (persist_tx, persist_rx) = mpsc::unbounded_channel();
    let port = config.port;
    let app_state = AppState::new(config, room, persist_tx);

    driver::spawn(app_state.clone());
    persistence::spawn(app_state.clone(), store, persist_rx);

    let app = build_router(app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
