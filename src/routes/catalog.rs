//! HTTP catalog administration: bulk import and the JSON export dump.

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::{
    dto::view::{ParticipantView, PlayerView, SaleView},
    error::AppError,
    services::broadcast::publish,
    state::{SharedState, catalog::rebuild_view, room::Role},
};

/// Header carrying the host bearer token for HTTP catalog administration.
const HOST_TOKEN_HEADER: &str = "x-host-token";

/// One player row in an import request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerImport {
    /// Player name.
    pub name: String,
    /// Role letter.
    pub role: String,
    /// Origin club label.
    #[serde(default)]
    pub club: Option<String>,
    /// Optional rating.
    #[serde(default)]
    pub rating: Option<f64>,
}

/// Body of `POST /api/catalog/import`.
#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    /// Replacement catalog.
    pub players: Vec<PlayerImport>,
}

/// Result of an import: how many rows were kept and how many dropped.
#[derive(Debug, Serialize)]
pub struct ImportResponse {
    /// Rows accepted into the catalog.
    pub imported: usize,
    /// Rows dropped for a missing name or unknown role.
    pub rejected: usize,
}

/// Replace the master catalog with the posted player list.
pub async fn import_catalog(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportResponse>, AppError> {
    let token = headers
        .get(HOST_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing host token".into()))?;

    let total = request.players.len();
    let players: Vec<_> = request
        .players
        .into_iter()
        .filter_map(|row| {
            let name = row.name.trim().to_string();
            let role = Role::parse(&row.role)?;
            (!name.is_empty()).then(|| crate::state::room::Player {
                name,
                role,
                club: row.club.map(|c| c.trim().to_string()).unwrap_or_default(),
                rating: row.rating,
            })
        })
        .collect();
    if players.is_empty() {
        return Err(AppError::BadRequest("no valid players in the import".into()));
    }

    let mut room = state.room().await;
    if room.host.token.as_deref() != Some(token) {
        return Err(AppError::Unauthorized("host token does not match".into()));
    }
    let imported = players.len();
    room.players = players;
    room.current_index = 0;
    rebuild_view(&mut room, None);
    room.touch();
    publish(&state, &room);
    info!(imported, rejected = total - imported, "catalog imported");

    Ok(Json(ImportResponse {
        imported,
        rejected: total - imported,
    }))
}

/// JSON dump of teams, history, and the remaining catalog.
pub async fn export_all(State(state): State<SharedState>) -> Json<Value> {
    let room = state.room().await;
    let teams: Vec<ParticipantView> = room.teams.values().map(Into::into).collect();
    let history: Vec<SaleView> = room.history.iter().map(Into::into).collect();
    let players: Vec<PlayerView> = room.players.iter().map(PlayerView::from_player).collect();
    Json(json!({ "teams": teams, "history": history, "players": players }))
}

/// Configure the catalog administration subtree.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/api/catalog/import", post(import_catalog))
        .route("/api/export", get(export_all))
}
