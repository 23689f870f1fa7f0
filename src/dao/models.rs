//! Durable snapshot entities and the pure codec between them and the live
//! [`Room`] aggregate.
//!
//! Volatile state never reaches disk: connection bindings, timers, the
//! catalog roll flag, the per-team bid debounce map, and the live host owner
//! are all reset on hydration. The host's bound client id and bearer token
//! are durable, so after a restart the same client can reclaim the slot, but
//! only through the explicit reclaim handshake.

use serde::{Deserialize, Serialize};

use crate::{
    config::AuctionRules,
    state::{
        catalog::rebuild_view,
        phase::Phase,
        room::{
            Acquisition, Player, Role, RoleFilter, Room, SaleRecord, Team, make_key,
        },
    },
};

/// Durable projection of a [`Room`], one JSON document per room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    /// Room identifier.
    pub id: String,
    /// Creation timestamp, epoch milliseconds.
    pub created_at: i64,
    /// Monotonic state version at serialization time.
    pub version: u64,
    /// Session epoch at serialization time.
    pub session_epoch: u32,
    /// Phase at serialization time.
    pub phase: Phase,
    /// Highest accepted bid.
    pub top_bid: u32,
    /// Leading team id, if any.
    pub leader: Option<String>,
    /// Registered teams.
    pub teams: Vec<TeamEntity>,
    /// Sale ledger.
    pub history: Vec<SaleEntity>,
    /// Master catalog.
    pub players: Vec<PlayerEntity>,
    /// Role filter as its wire string.
    pub filter_role: String,
    /// Catalog cursor.
    pub current_index: usize,
    /// Arm window, milliseconds.
    pub arm_ms: i64,
    /// Roll interval, milliseconds.
    pub roll_ms: i64,
    /// Client identity bound to the host slot, if ever claimed.
    #[serde(default)]
    pub host_client_id: Option<String>,
    /// Host bearer token, kept so the host can reclaim after a restart.
    #[serde(default)]
    pub host_token: Option<String>,
}

/// Durable form of a [`Team`]. The live connection binding is dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEntity {
    /// Team identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Credit balance.
    pub credits: u32,
    /// Items won.
    #[serde(default)]
    pub acquisitions: Vec<AcquisitionEntity>,
    /// Session bearer key, if one was issued.
    pub key: Option<String>,
    /// Session epoch the team was created under.
    #[serde(default = "default_epoch")]
    pub session_epoch: u32,
}

/// Durable form of an [`Acquisition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquisitionEntity {
    /// Player name at sale time.
    pub player: String,
    /// Player role at sale time.
    pub role: Role,
    /// Price paid.
    pub price: u32,
    /// Settlement timestamp.
    pub at: i64,
}

/// Durable form of a [`SaleRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleEntity {
    /// Row identifier.
    pub id: String,
    /// Creation timestamp.
    pub at: i64,
    /// Session epoch the sale belongs to.
    #[serde(default = "default_epoch")]
    pub session_epoch: u32,
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
    /// Player club snapshot.
    #[serde(default)]
    pub player_club: String,
    /// Player rating snapshot.
    pub player_rating: Option<f64>,
    /// Composite player identity.
    pub player_key: Option<String>,
    /// Whether the sale was settled.
    #[serde(default)]
    pub finalized: bool,
    /// Settlement timestamp.
    pub finalized_at: Option<i64>,
}

/// Durable form of a [`Player`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntity {
    /// Player name.
    pub name: String,
    /// Player role.
    pub role: Role,
    /// Origin club label.
    #[serde(default)]
    pub club: String,
    /// Optional rating.
    pub rating: Option<f64>,
}

fn default_epoch() -> u32 {
    1
}

impl From<&Team> for TeamEntity {
    fn from(team: &Team) -> Self {
        Self {
            id: team.id.clone(),
            name: team.name.clone(),
            credits: team.credits,
            acquisitions: team.acquisitions.iter().map(Into::into).collect(),
            key: Some(team.key.clone()),
            session_epoch: team.session_epoch,
        }
    }
}

impl From<&Acquisition> for AcquisitionEntity {
    fn from(acq: &Acquisition) -> Self {
        Self {
            player: acq.player.clone(),
            role: acq.role,
            price: acq.price,
            at: acq.at,
        }
    }
}

impl From<AcquisitionEntity> for Acquisition {
    fn from(entity: AcquisitionEntity) -> Self {
        Self {
            player: entity.player,
            role: entity.role,
            price: entity.price,
            at: entity.at,
        }
    }
}

impl From<&SaleRecord> for SaleEntity {
    fn from(sale: &SaleRecord) -> Self {
        Self {
            id: sale.id.clone(),
            at: sale.at,
            session_epoch: sale.session_epoch,
            team_id: sale.team_id.clone(),
            team_name: sale.team_name.clone(),
            price: sale.price,
            player_name: sale.player_name.clone(),
            role: sale.role,
            player_club: sale.player_club.clone(),
            player_rating: sale.player_rating,
            player_key: sale.player_key.clone(),
            finalized: sale.finalized,
            finalized_at: sale.finalized_at,
        }
    }
}

impl From<SaleEntity> for SaleRecord {
    fn from(entity: SaleEntity) -> Self {
        Self {
            id: entity.id,
            at: entity.at,
            session_epoch: entity.session_epoch,
            team_id: entity.team_id,
            team_name: entity.team_name,
            price: entity.price,
            player_name: entity.player_name,
            role: entity.role,
            player_club: entity.player_club,
            player_rating: entity.player_rating,
            player_key: entity.player_key,
            finalized: entity.finalized,
            finalized_at: entity.finalized_at,
        }
    }
}

impl From<&Player> for PlayerEntity {
    fn from(player: &Player) -> Self {
        Self {
            name: player.name.clone(),
            role: player.role,
            club: player.club.clone(),
            rating: player.rating,
        }
    }
}

impl From<PlayerEntity> for Player {
    fn from(entity: PlayerEntity) -> Self {
        Self {
            name: entity.name,
            role: entity.role,
            club: entity.club,
            rating: entity.rating,
        }
    }
}

impl From<&Room> for RoomSnapshot {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id.clone(),
            created_at: room.created_at,
            version: room.version,
            session_epoch: room.session_epoch,
            phase: room.phase,
            top_bid: room.top_bid,
            leader: room.leader.clone(),
            teams: room.teams.values().map(Into::into).collect(),
            history: room.history.iter().map(Into::into).collect(),
            players: room.players.iter().map(Into::into).collect(),
            filter_role: room.filter_role.as_str().to_string(),
            current_index: room.current_index,
            arm_ms: room.arm_ms,
            roll_ms: room.roll_ms,
            host_client_id: room.host.client_id.clone(),
            host_token: room.host.token.clone(),
        }
    }
}

impl RoomSnapshot {
    /// Hydrate a live [`Room`] from this snapshot, resetting every volatile
    /// field to its safe default and rebuilding the catalog view.
    pub fn into_room(self, rules: AuctionRules, now: i64) -> Room {
        let mut room = Room::new(self.id, rules, now);
        room.created_at = self.created_at;
        room.version = self.version;
        room.session_epoch = self.session_epoch;
        room.phase = self.phase;
        room.top_bid = self.top_bid;
        room.leader = self.leader;
        room.arm_ms = self.arm_ms;
        room.roll_ms = self.roll_ms;
        room.filter_role = RoleFilter::parse(&self.filter_role).unwrap_or(RoleFilter::All);
        room.current_index = self.current_index;
        room.host.client_id = self.host_client_id;
        room.host.token = self.host_token;
        room.history = self.history.into_iter().map(Into::into).collect();
        room.players = self.players.into_iter().map(Into::into).collect();
        room.teams = self
            .teams
            .into_iter()
            .map(|entity| {
                let team = Team {
                    id: entity.id.clone(),
                    name: entity.name,
                    credits: entity.credits,
                    acquisitions: entity.acquisitions.into_iter().map(Into::into).collect(),
                    key: entity.key.unwrap_or_else(make_key),
                    session_epoch: entity.session_epoch,
                    conn: None,
                };
                (entity.id, team)
            })
            .collect();

        rebuild_view(&mut room, None);
        room
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::{ConnId, HostSlot};

    fn sample_room() -> Room {
        let mut room = Room::new("MAIN", AuctionRules::default(), 100);
        room.session_epoch = 2;
        room.phase = Phase::Sold;
        room.top_bid = 42;
        room.players.push(Player {
            name: "Rossi".into(),
            role: Role::A,
            club: "Milan".into(),
            rating: Some(6.5),
        });
        room.teams.insert(
            "ALPHA".into(),
            Team {
                id: "ALPHA".into(),
                name: "Alpha".into(),
                credits: 58,
                acquisitions: vec![Acquisition {
                    player: "Verdi".into(),
                    role: Role::C,
                    price: 12,
                    at: 50,
                }],
                key: "secret".into(),
                session_epoch: 2,
                conn: Some(ConnId::new_v4()),
            },
        );
        room.leader = Some("ALPHA".into());
        room.host = HostSlot {
            owner: Some(ConnId::new_v4()),
            client_id: Some("client".into()),
            token: Some("token".into()),
        };
        room.deadline = 9999;
        room.countdown_sec = 2;
        room.rolling = true;
        room
    }

    #[test]
    fn codec_round_trip_preserves_durable_fields() {
        let room = sample_room();
        let snapshot = RoomSnapshot::from(&room);
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: RoomSnapshot = serde_json::from_str(&json).unwrap();
        let restored = decoded.into_room(AuctionRules::default(), 500);

        assert_eq!(restored.id, "MAIN");
        assert_eq!(restored.session_epoch, 2);
        assert_eq!(restored.phase, Phase::Sold);
        assert_eq!(restored.top_bid, 42);
        assert_eq!(restored.leader.as_deref(), Some("ALPHA"));
        let team = restored.teams.get("ALPHA").unwrap();
        assert_eq!(team.credits, 58);
        assert_eq!(team.key, "secret");
        assert_eq!(team.acquisitions.len(), 1);
        assert_eq!(restored.players.len(), 1);
        assert_eq!(restored.view_players.len(), 1);
    }

    #[test]
    fn hydration_resets_volatile_state() {
        let room = sample_room();
        let restored =
            RoomSnapshot::from(&room).into_room(AuctionRules::default(), 500);

        assert!(restored.host.owner.is_none());
        // The binding survives so the same client can reclaim after restart.
        assert_eq!(restored.host.client_id.as_deref(), Some("client"));
        assert_eq!(restored.host.token.as_deref(), Some("token"));
        assert_eq!(restored.deadline, 0);
        assert_eq!(restored.countdown_sec, 0);
        assert!(!restored.rolling);
        assert!(restored.last_bid_at.is_empty());
        assert!(restored.teams.get("ALPHA").unwrap().conn.is_none());
    }
}
