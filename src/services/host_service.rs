//! Host authority: the single volatile host slot, its claim/reclaim
//! handshake, and the catalog controls only the host may drive.

use rand::Rng;
use tracing::info;

use crate::{
    error::ServiceError,
    state::{
        catalog::rebuild_view,
        phase::Phase,
        room::{ConnId, Room, make_key},
    },
};

/// Bounds for the catalog roll interval, milliseconds.
const ROLL_MS_MIN: i64 = 300;
const ROLL_MS_MAX: i64 = 5000;
/// Upper bound for one backwards cursor move.
const BACK_MAX: usize = 10;

/// Result of a host claim or reclaim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostGrant {
    /// Whether the caller now holds the slot.
    pub host: bool,
    /// Bearer token to present on reclaim, issued on a fresh claim.
    pub token: Option<String>,
}

/// Claim the host slot when vacant, or release it when held by the caller.
///
/// A dead owner (its connection no longer live) is swept before the claim
/// check. When a PIN is configured, claiming requires it; releasing never
/// does. Claiming from the lobby starts the auction.
pub fn toggle_host(
    room: &mut Room,
    conn: ConnId,
    client_id: &str,
    pin: Option<&str>,
    configured_pin: Option<&str>,
    live: impl Fn(ConnId) -> bool,
    now: i64,
) -> Result<HostGrant, ServiceError> {
    sweep_dead_owner(room, &live);

    if room.host.owner == Some(conn) {
        room.host.owner = None;
        room.host.client_id = None;
        room.host.token = None;
        room.touch();
        info!(client = %client_id, "host slot released");
        return Ok(HostGrant {
            host: false,
            token: None,
        });
    }
    if room.host.owner.is_some() {
        return Err(ServiceError::Unauthorized(
            "host slot is already held".into(),
        ));
    }
    if let Some(expected) = configured_pin
        && pin != Some(expected)
    {
        return Err(ServiceError::Unauthorized("wrong host PIN".into()));
    }

    let token = make_key();
    room.host.owner = Some(conn);
    room.host.client_id = Some(client_id.to_string());
    room.host.token = Some(token.clone());
    if room.phase == Phase::Lobby {
        room.transition(Phase::Rolling, now);
    }
    room.touch();
    info!(client = %client_id, "host slot claimed");

    Ok(HostGrant {
        host: true,
        token: Some(token),
    })
}

/// Reclaim the host slot after a disconnect.
///
/// Requires both the client identity bound at claim time and the issued
/// token; either alone is not enough. Succeeds only when the slot is vacant
/// or still bound to a dead connection.
pub fn reclaim_host(
    room: &mut Room,
    conn: ConnId,
    client_id: &str,
    token: &str,
    live: impl Fn(ConnId) -> bool,
) -> Result<HostGrant, ServiceError> {
    sweep_dead_owner(room, &live);

    if room.host.client_id.as_deref() != Some(client_id)
        || room.host.token.as_deref() != Some(token)
    {
        return Err(ServiceError::Unauthorized(
            "host credentials do not match".into(),
        ));
    }
    if room.host.owner.is_some() && room.host.owner != Some(conn) {
        return Err(ServiceError::Unauthorized(
            "host slot is already held".into(),
        ));
    }

    room.host.owner = Some(conn);
    room.touch();
    info!(client = %client_id, "host slot reclaimed");
    Ok(HostGrant {
        host: true,
        token: room.host.token.clone(),
    })
}

/// Silent reclaim attempt during the connection handshake, driven by the
/// token the client presented as a query parameter.
pub fn recover_on_connect(room: &mut Room, conn: ConnId, client_id: &str, token: &str) -> bool {
    if room.host.owner.is_none()
        && room.host.client_id.as_deref() == Some(client_id)
        && room.host.token.as_deref() == Some(token)
    {
        room.host.owner = Some(conn);
        room.touch();
        info!(client = %client_id, "host slot recovered on connect");
        return true;
    }
    false
}

/// Clear the owner when the host's connection drops. The bound client id and
/// token survive so the same client can reclaim.
pub fn host_disconnected(room: &mut Room, conn: ConnId) -> bool {
    if room.host.owner == Some(conn) {
        room.host.owner = None;
        room.touch();
        return true;
    }
    false
}

/// Require that `conn` currently holds the host slot.
pub fn ensure_host(room: &Room, conn: ConnId) -> Result<(), ServiceError> {
    if room.host.owner == Some(conn) {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized("host authority required".into()))
    }
}

fn sweep_dead_owner(room: &mut Room, live: &impl Fn(ConnId) -> bool) {
    if let Some(owner) = room.host.owner
        && !live(owner)
    {
        room.host.owner = None;
    }
}

fn ensure_not_locked(room: &Room) -> Result<(), ServiceError> {
    if room.phase.is_bidding_locked() || room.phase == Phase::Sold {
        Err(ServiceError::InvalidState(
            "not allowed while a bid round is open".into(),
        ))
    } else {
        Ok(())
    }
}

/// Set the case-insensitive name query and rebuild the view.
pub fn set_filter_name(room: &mut Room, q: &str) -> Result<(), ServiceError> {
    ensure_not_locked(room)?;
    room.filter_name = q.trim().to_string();
    rebuild_view(room, None);
    if room.view_players.is_empty() {
        room.rolling = false;
    }
    room.touch();
    Ok(())
}

/// Set the role filter (`ALL` or a role letter) and rebuild the view.
pub fn set_role_filter(room: &mut Room, role: &str) -> Result<(), ServiceError> {
    ensure_not_locked(room)?;
    let filter = crate::state::room::RoleFilter::parse(role)
        .ok_or_else(|| ServiceError::InvalidInput(format!("unknown role filter {role:?}")))?;
    room.filter_role = filter;
    rebuild_view(room, None);
    if room.view_players.is_empty() {
        room.rolling = false;
    }
    room.touch();
    Ok(())
}

/// Jump to a random starting letter, start rolling, and leave the lobby.
/// Returns the letter actually used after the forward scan.
pub fn random_start(room: &mut Room, now: i64) -> Result<Option<char>, ServiceError> {
    ensure_not_locked(room)?;
    if room.view_players.is_empty() {
        return Err(ServiceError::InvalidState("the catalog view is empty".into()));
    }
    let letter = (b'A' + rand::rng().random_range(0..26u8)) as char;
    let used = rebuild_view(room, Some(letter));
    if room.phase == Phase::Lobby {
        room.transition(Phase::Rolling, now);
    }
    room.rolling = true;
    room.roll_tick_at = now;
    room.touch();
    Ok(used)
}

/// Start or stop the automatic catalog roll. Returns the new state.
pub fn toggle_roll(room: &mut Room, now: i64) -> Result<bool, ServiceError> {
    ensure_not_locked(room)?;
    if !room.rolling && room.view_players.is_empty() {
        return Err(ServiceError::InvalidState("the catalog view is empty".into()));
    }
    room.rolling = !room.rolling;
    if room.rolling {
        if room.phase == Phase::Lobby {
            room.transition(Phase::Rolling, now);
        }
        room.roll_tick_at = now;
    }
    room.touch();
    Ok(room.rolling)
}

/// Stop the automatic catalog roll.
pub fn stop_roll(room: &mut Room) {
    if room.rolling {
        room.rolling = false;
        room.touch();
    }
}

/// Change the roll advance interval, clamped to sane bounds. Returns the
/// interval actually applied.
pub fn set_roll_ms(room: &mut Room, ms: i64) -> i64 {
    room.roll_ms = ms.clamp(ROLL_MS_MIN, ROLL_MS_MAX);
    room.touch();
    room.roll_ms
}

/// Advance the cursor by one, wrapping at the end of the view.
pub fn skip(room: &mut Room, _now: i64) -> Result<(), ServiceError> {
    ensure_not_locked(room)?;
    if room.view_players.is_empty() {
        return Err(ServiceError::InvalidState("the catalog view is empty".into()));
    }
    room.current_index = (room.current_index + 1) % room.view_players.len();
    room.touch();
    Ok(())
}

/// Move the cursor back by up to [`BACK_MAX`] entries, wrapping backwards.
pub fn back_n(room: &mut Room, n: usize) -> Result<(), ServiceError> {
    ensure_not_locked(room)?;
    if room.view_players.is_empty() {
        return Err(ServiceError::InvalidState("the catalog view is empty".into()));
    }
    let len = room.view_players.len();
    let steps = n.clamp(1, BACK_MAX) % len.max(1);
    room.current_index = (room.current_index + len - steps % len) % len;
    room.touch();
    Ok(())
}

/// Pin the cursor to an absolute index into the current view and stop the
/// roll so the selection sticks.
pub fn pin_index(room: &mut Room, index: usize) -> Result<(), ServiceError> {
    ensure_not_locked(room)?;
    if index >= room.view_players.len() {
        return Err(ServiceError::InvalidInput(format!(
            "index {index} is outside the view"
        )));
    }
    room.current_index = index;
    room.rolling = false;
    room.touch();
    Ok(())
}

/// Remove a team from the room, returning the connection that was bound to
/// it so the caller can notify it. The team's acquisitions go back into the
/// catalog. Refused mid-round; allowed in `Sold` so the host can correct a
/// stuck pending sale.
pub fn kick(room: &mut Room, team_id: &str, now: i64) -> Result<Option<ConnId>, ServiceError> {
    if room.phase.is_bidding_locked() {
        return Err(ServiceError::InvalidState(
            "cannot kick while a bid round is open".into(),
        ));
    }
    let Some(team) = room.teams.shift_remove(team_id) else {
        return Err(ServiceError::NotFound(format!("unknown team {team_id}")));
    };

    for acq in &team.acquisitions {
        crate::state::catalog::add_back_to_catalog(room, &acq.player, acq.role, None, None);
    }
    room.last_bid_at.remove(team_id);
    if room.leader.as_deref() == Some(team_id) {
        if room.phase == Phase::Sold {
            room.transition(Phase::Rolling, now);
        } else {
            room.top_bid = 0;
            room.leader = None;
        }
    }
    room.touch();
    info!(team = %team_id, "team kicked");
    Ok(team.conn)
}

/// Wipe the room back to an empty lobby under a fresh session epoch. Stale
/// session keys and old history rows die with the epoch bump.
pub fn full_reset(room: &mut Room, now: i64) -> Result<(), ServiceError> {
    if room.phase.is_bidding_locked() {
        return Err(ServiceError::InvalidState(
            "cannot reset while a bid round is open".into(),
        ));
    }
    room.session_epoch += 1;
    room.teams.clear();
    room.history.clear();
    room.host = Default::default();
    room.top_bid = 0;
    room.leader = None;
    room.current_index = 0;
    room.rolling = false;
    room.last_bid_at.clear();
    room.last_assign_error = None;
    room.transition(Phase::Lobby, now);
    room.touch();
    info!(epoch = room.session_epoch, "room fully reset");
    Ok(())
}
