//! Per-observer projection of the room, the only shape clients ever see.

use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::state::{
    phase::Phase,
    room::{Acquisition, AssignError, ConnId, Player, Role, Room, SaleRecord, Team},
};

/// How many settled or pending sales the projection carries.
const RECENT_SALES: usize = 12;

/// Snapshot of the room tailored to one observer.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    /// Room identifier.
    pub id: String,
    /// Session epoch; bumps on full reset.
    pub session_epoch: u32,
    /// Monotonic state version.
    pub version: u64,
    /// Current phase.
    pub phase: Phase,
    /// Whether the host slot is currently held.
    pub host_locked: bool,
    /// Last failed settlement, if unresolved.
    pub last_assign_error: Option<AssignError>,
    /// Current top bid.
    pub top_bid: u32,
    /// Leading team id.
    pub leader: Option<String>,
    /// Leading team display name.
    pub leader_name: Option<String>,
    /// Milliseconds until the active deadline, zero when none.
    pub time_ms: i64,
    /// Seconds left on the closing countdown, zero outside it.
    pub countdown_sec: u8,
    /// Catalog roll interval.
    pub roll_ms: i64,
    /// Whether the automatic roll is running.
    pub rolling: bool,
    /// Active role filter as its wire string.
    pub filter_role: String,
    /// All registered teams.
    pub participants: Vec<ParticipantView>,
    /// Most recent sales of the current session, oldest first.
    pub recent_sales: Vec<SaleView>,
    /// The observer's team id, once bound.
    pub you: Option<String>,
    /// `LEADING` or `OUTBID`, only while a bid round is open.
    pub you_state: Option<&'static str>,
    /// The observer's credit balance.
    pub you_credits: Option<u32>,
    /// The observer's acquisitions.
    pub acquisitions: Option<Vec<AcquisitionView>>,
    /// Whether the observer holds the host slot.
    pub you_are_host: bool,
    /// Player currently offered.
    pub current_player: Option<PlayerView>,
    /// Previous player in the browsing order.
    pub prev_player: Option<PlayerView>,
    /// Next player in the browsing order.
    pub next_player: Option<PlayerView>,
}

/// One catalog entry as shown to clients.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    /// Composite identity, used to address the player in commands.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Role letter.
    pub role: Role,
    /// Origin club, omitted when unknown.
    pub club: Option<String>,
    /// Rating, omitted when unknown.
    pub rating: Option<f64>,
}

/// One registered team as shown to every observer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    /// Team id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Remaining credits.
    pub credits: u32,
    /// Whether a live connection is bound to the team.
    pub online: bool,
    /// Number of items won.
    pub acquisitions: usize,
}

/// One ledger row as shown to clients.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleView {
    /// Row id, used to address the sale in undo commands.
    pub id: String,
    /// Winning team id.
    pub team_id: String,
    /// Winning team name snapshot.
    pub team_name: String,
    /// Price awarded.
    pub price: u32,
    /// Player name snapshot.
    pub player_name: String,
    /// Player role snapshot.
    pub role: Role,
    /// Player club snapshot, omitted when unknown.
    pub player_club: Option<String>,
    /// Player rating snapshot.
    pub player_rating: Option<f64>,
    /// Whether the sale was settled.
    pub finalized: bool,
    /// Row creation timestamp.
    pub at: i64,
}

/// One item on the observer's own roster.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionView {
    /// Player name at sale time.
    pub player: String,
    /// Player role at sale time.
    pub role: Role,
    /// Price paid.
    pub price: u32,
    /// Settlement timestamp.
    pub at: i64,
}

impl PlayerView {
    /// Project one catalog entry, deriving the addressable id.
    pub fn from_player(player: &Player) -> Self {
        let id = player
            .key()
            .unwrap_or_else(|| format!("{}#{}", player.name.to_lowercase(), player.role));
        Self {
            id,
            name: player.name.clone(),
            role: player.role,
            club: (!player.club.trim().is_empty()).then(|| player.club.clone()),
            rating: player.rating,
        }
    }
}

impl From<&SaleRecord> for SaleView {
    fn from(sale: &SaleRecord) -> Self {
        Self {
            id: sale.id.clone(),
            team_id: sale.team_id.clone(),
            team_name: sale.team_name.clone(),
            price: sale.price,
            player_name: sale.player_name.clone(),
            role: sale.role,
            player_club: (!sale.player_club.trim().is_empty())
                .then(|| sale.player_club.clone()),
            player_rating: sale.player_rating,
            finalized: sale.finalized,
            at: sale.at,
        }
    }
}

impl From<&Acquisition> for AcquisitionView {
    fn from(acq: &Acquisition) -> Self {
        Self {
            player: acq.player.clone(),
            role: acq.role,
            price: acq.price,
            at: acq.at,
        }
    }
}

impl From<&Team> for ParticipantView {
    fn from(team: &Team) -> Self {
        Self {
            id: team.id.clone(),
            name: team.name.clone(),
            credits: team.credits,
            online: team.conn.is_some(),
            acquisitions: team.acquisitions.len(),
        }
    }
}

impl RoomView {
    /// Project the room for one observer.
    ///
    /// `team_id` is the team bound to the observer's connection, if any, and
    /// `conn` the observer's connection id; both `None` yields the public
    /// projection used by the SSE stream.
    pub fn project(room: &Room, team_id: Option<&str>, conn: Option<ConnId>, now: i64) -> Self {
        let you = team_id.and_then(|id| room.teams.get(id));
        let you_state = match (team_id, room.leader.as_deref()) {
            (Some(me), Some(leader)) if room.phase.accepts_bids() && room.top_bid > 0 => {
                Some(if me == leader { "LEADING" } else { "OUTBID" })
            }
            _ => None,
        };
        let leader_name = room
            .leader
            .as_deref()
            .and_then(|id| room.teams.get(id))
            .map(|team| team.name.clone());

        let recent_sales = room
            .history
            .iter()
            .filter(|sale| sale.session_epoch == room.session_epoch)
            .rev()
            .take(RECENT_SALES)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(SaleView::from)
            .collect();

        let current = room.current_player().map(PlayerView::from_player);
        // Neighbors wrap around the view edges, mirroring the catalog roll.
        let n = room.view_players.len();
        let (prev_player, next_player) = if n > 0 {
            let idx = room.current_index.min(n - 1);
            (
                room.view_players
                    .get((idx + n - 1) % n)
                    .map(PlayerView::from_player),
                room.view_players.get((idx + 1) % n).map(PlayerView::from_player),
            )
        } else {
            (None, None)
        };

        Self {
            id: room.id.clone(),
            session_epoch: room.session_epoch,
            version: room.version,
            phase: room.phase,
            host_locked: room.host.owner.is_some(),
            last_assign_error: room.last_assign_error.clone(),
            top_bid: room.top_bid,
            leader: room.leader.clone(),
            leader_name,
            time_ms: if room.deadline > 0 {
                (room.deadline - now).max(0)
            } else {
                0
            },
            countdown_sec: if room.phase == Phase::Countdown {
                room.countdown_sec
            } else {
                0
            },
            roll_ms: room.roll_ms,
            rolling: room.rolling,
            filter_role: room.filter_role.as_str().to_string(),
            participants: room.teams.values().map(ParticipantView::from).collect(),
            recent_sales,
            you: you.map(|team| team.id.clone()),
            you_state,
            you_credits: you.map(|team| team.credits),
            acquisitions: you
                .map(|team| team.acquisitions.iter().map(AcquisitionView::from).collect()),
            you_are_host: conn.is_some() && conn == room.host.owner,
            current_player: current,
            prev_player,
            next_player,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AuctionRules,
        state::room::{make_key, player_key},
    };

    fn room_with_team() -> Room {
        let mut room = Room::new("MAIN", AuctionRules::default(), 0);
        room.teams.insert(
            "ALPHA".into(),
            Team {
                id: "ALPHA".into(),
                name: "Alpha".into(),
                credits: 200,
                acquisitions: vec![],
                key: make_key(),
                session_epoch: 1,
                conn: None,
            },
        );
        room.teams.insert(
            "BETA".into(),
            Team {
                id: "BETA".into(),
                name: "Beta".into(),
                credits: 180,
                acquisitions: vec![],
                key: make_key(),
                session_epoch: 1,
                conn: None,
            },
        );
        room
    }

    #[test]
    fn leader_sees_leading_and_rival_sees_outbid() {
        let mut room = room_with_team();
        room.transition(Phase::Running, 0);
        room.top_bid = 10;
        room.leader = Some("ALPHA".into());

        let leading = RoomView::project(&room, Some("ALPHA"), None, 0);
        assert_eq!(leading.you_state, Some("LEADING"));
        let rival = RoomView::project(&room, Some("BETA"), None, 0);
        assert_eq!(rival.you_state, Some("OUTBID"));
        let public = RoomView::project(&room, None, None, 0);
        assert_eq!(public.you_state, None);
        assert_eq!(public.leader_name.as_deref(), Some("Alpha"));
    }

    #[test]
    fn time_ms_never_goes_negative() {
        let mut room = room_with_team();
        room.transition(Phase::Armed, 1_000);
        let view = RoomView::project(&room, None, None, 10_000);
        assert_eq!(view.time_ms, 0);
    }

    #[test]
    fn countdown_seconds_hidden_outside_countdown() {
        let mut room = room_with_team();
        room.transition(Phase::Countdown, 0);
        room.transition(Phase::Sold, 0);
        let view = RoomView::project(&room, None, None, 0);
        assert_eq!(view.countdown_sec, 0);
    }

    #[test]
    fn recent_sales_are_scoped_to_the_current_epoch() {
        let mut room = room_with_team();
        for (epoch, id) in [(1u32, "old"), (2, "new")] {
            room.history.push(SaleRecord {
                id: id.into(),
                at: 0,
                session_epoch: epoch,
                team_id: "ALPHA".into(),
                team_name: "Alpha".into(),
                price: 1,
                player_name: "Rossi".into(),
                role: Role::A,
                player_club: String::new(),
                player_rating: None,
                player_key: player_key("Rossi", Role::A, "", None),
                finalized: true,
                finalized_at: Some(0),
            });
        }
        room.session_epoch = 2;
        let view = RoomView::project(&room, None, None, 0);
        assert_eq!(view.recent_sales.len(), 1);
        assert_eq!(view.recent_sales[0].id, "new");
    }

    #[test]
    fn neighbor_players_follow_the_cursor() {
        let mut room = room_with_team();
        for name in ["Aldo", "Bruno", "Carlo"] {
            room.players.push(Player {
                name: name.into(),
                role: Role::C,
                club: String::new(),
                rating: None,
            });
        }
        room.view_players = room.players.clone();
        room.current_index = 1;
        let view = RoomView::project(&room, None, None, 0);
        assert_eq!(view.prev_player.unwrap().name, "Aldo");
        assert_eq!(view.current_player.unwrap().name, "Bruno");
        assert_eq!(view.next_player.unwrap().name, "Carlo");
    }

    #[test]
    fn neighbor_players_wrap_at_the_view_edges() {
        let mut room = room_with_team();
        for name in ["Aldo", "Bruno", "Carlo"] {
            room.players.push(Player {
                name: name.into(),
                role: Role::C,
                club: String::new(),
                rating: None,
            });
        }
        room.view_players = room.players.clone();

        room.current_index = 0;
        let view = RoomView::project(&room, None, None, 0);
        assert_eq!(view.prev_player.unwrap().name, "Carlo");
        assert_eq!(view.next_player.unwrap().name, "Bruno");

        room.current_index = 2;
        let view = RoomView::project(&room, None, None, 0);
        assert_eq!(view.prev_player.unwrap().name, "Bruno");
        assert_eq!(view.next_player.unwrap().name, "Aldo");
    }
}
