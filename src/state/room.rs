//! The auction room aggregate and its domain entities.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::AuctionRules,
    state::phase::{COUNTDOWN_START_SEC, COUNTDOWN_TICK_MS, Phase},
};

/// Identifier of a live transport connection. Never persisted.
pub type ConnId = Uuid;

/// Fixed set of player categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Goalkeeper ("portiere").
    P,
    /// Defender ("difensore").
    D,
    /// Midfielder ("centrocampista").
    C,
    /// Forward ("attaccante").
    A,
}

impl Role {
    /// Parse a role letter, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "P" => Some(Role::P),
            "D" => Some(Role::D),
            "C" => Some(Role::C),
            "A" => Some(Role::A),
            _ => None,
        }
    }

    /// Canonical single-letter representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::P => "P",
            Role::D => "D",
            Role::C => "C",
            Role::A => "A",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role filter applied to the catalog view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleFilter {
    /// No filtering; every role is shown.
    All,
    /// Only players with the given role are shown.
    Only(Role),
}

impl RoleFilter {
    /// Parse `"ALL"` or a role letter.
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        if upper == "ALL" {
            return Some(RoleFilter::All);
        }
        Role::parse(&upper).map(RoleFilter::Only)
    }

    /// Whether a player with `role` passes this filter.
    pub fn matches(self, role: Role) -> bool {
        match self {
            RoleFilter::All => true,
            RoleFilter::Only(only) => only == role,
        }
    }

    /// Canonical wire representation (`ALL`, `P`, `D`, `C`, `A`).
    pub fn as_str(self) -> &'static str {
        match self {
            RoleFilter::All => "ALL",
            RoleFilter::Only(role) => role.as_str(),
        }
    }
}

/// A biddable catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    /// Player display name.
    pub name: String,
    /// Category the player belongs to.
    pub role: Role,
    /// Origin club label; may be empty when the import lacked it.
    pub club: String,
    /// Optional numeric rating.
    pub rating: Option<f64>,
}

/// Deterministic composite identity for a catalog entry.
///
/// Built from name, role, club, and rating; names alone collide across
/// categories and origin clubs, so the key never degrades to the name.
/// Returns `None` when the name is empty.
pub fn player_key(name: &str, role: Role, club: &str, rating: Option<f64>) -> Option<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return None;
    }
    let club = club.trim().to_lowercase();
    let rating_part = rating.map(fmt_rating).unwrap_or_default();
    Some(format!("{name}#{role}#{club}#{rating_part}"))
}

impl Player {
    /// Composite identity of this player, if it has a usable name.
    pub fn key(&self) -> Option<String> {
        player_key(&self.name, self.role, &self.club, self.rating)
    }
}

/// Render a rating the way it is keyed: integral values without decimals.
pub fn fmt_rating(rating: f64) -> String {
    rating.to_string()
}

/// One item won by a team.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    /// Player name at sale time.
    pub player: String,
    /// Player role at sale time.
    pub role: Role,
    /// Price paid.
    pub price: u32,
    /// Settlement timestamp, epoch milliseconds.
    pub at: i64,
}

/// A registered bidding party.
#[derive(Debug, Clone)]
pub struct Team {
    /// Stable identifier derived from the slugified name.
    pub id: String,
    /// Display name, unique under slugified comparison.
    pub name: String,
    /// Remaining credit balance.
    pub credits: u32,
    /// Items won so far.
    pub acquisitions: Vec<Acquisition>,
    /// Opaque session bearer key for reconnect resume.
    pub key: String,
    /// Session epoch the team was created under.
    pub session_epoch: u32,
    /// Live connection currently bound to this team, if any. Never persisted.
    pub conn: Option<ConnId>,
}

/// One row of the append-only sale ledger.
#[derive(Debug, Clone)]
pub struct SaleRecord {
    /// Unique row identifier.
    pub id: String,
    /// Creation timestamp, epoch milliseconds.
    pub at: i64,
    /// Session epoch this sale belongs to.
    pub session_epoch: u32,
    /// Winning team id.
    pub team_id: String,
    /// Winning team name at sale time.
    pub team_name: String,
    /// Price awarded.
    pub price: u32,
    /// Player name snapshot at sale time.
    pub player_name: String,
    /// Player role snapshot at sale time.
    pub role: Role,
    /// Player origin club snapshot at sale time.
    pub player_club: String,
    /// Player rating snapshot at sale time.
    pub player_rating: Option<f64>,
    /// Composite identity of the sold player, when derivable.
    pub player_key: Option<String>,
    /// Whether credits were actually debited and the item removed.
    pub finalized: bool,
    /// Settlement timestamp, set exactly once.
    pub finalized_at: Option<i64>,
}

/// Host-authority slot. The owner is volatile and resets on restart; the
/// bound client identity and token are durable so the same client can
/// reclaim, always through the explicit handshake.
#[derive(Debug, Clone, Default)]
pub struct HostSlot {
    /// Connection currently holding the host role. Never persisted.
    pub owner: Option<ConnId>,
    /// Client identity bound when the slot was last claimed; survives a
    /// disconnect so the same client can reclaim.
    pub client_id: Option<String>,
    /// Opaque bearer token issued at claim time.
    pub token: Option<String>,
}

/// Where a settlement attempt originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignSource {
    /// Timer-driven settlement after the countdown expired.
    Auto,
    /// Explicit finalize request from a client.
    Finalize,
    /// Host-forced manual assignment.
    Manual,
}

/// Room-level record of the last failed settlement, shown to all observers
/// until the host corrects the sale or the phase resets.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignError {
    /// Human-readable failure description.
    pub message: String,
    /// Team the failed settlement concerned, when known.
    pub team_id: Option<String>,
    /// Team display name, when known.
    pub team_name: Option<String>,
    /// Pending price, when known.
    pub price: Option<u32>,
    /// Pending player name, when known.
    pub player_name: Option<String>,
    /// Pending player role, when known.
    pub role: Option<Role>,
    /// When the failure was recorded, epoch milliseconds.
    pub at: i64,
    /// Which trigger path failed.
    pub source: AssignSource,
}

/// The aggregate root: one live auction room.
///
/// All mutation is serialized through a single lock owned by the application
/// state; cross-field invariants (`top_bid`/`leader` pairing, phase-coupled
/// deadline resets) are only ever updated together under that lock.
#[derive(Debug, Clone)]
pub struct Room {
    /// Room identifier, also the snapshot file stem.
    pub id: String,
    /// Creation timestamp, epoch milliseconds.
    pub created_at: i64,
    /// Monotonic state version; every observable mutation bumps it.
    pub version: u64,
    /// Incremented on full reset to invalidate stale sessions and history.
    pub session_epoch: u32,
    /// Current lifecycle phase.
    pub phase: Phase,
    /// Current highest accepted bid; 0 whenever `leader` is `None`.
    pub top_bid: u32,
    /// Team currently leading the auction.
    pub leader: Option<String>,
    /// Absolute wall-clock deadline driving timed transitions; 0 = none.
    pub deadline: i64,
    /// Seconds left on the closing countdown.
    pub countdown_sec: u8,
    /// Arm window applied after every accepted bid, milliseconds.
    pub arm_ms: i64,
    /// Catalog roll advance interval, milliseconds.
    pub roll_ms: i64,
    /// Auction rule set.
    pub rules: AuctionRules,
    /// Volatile host-authority slot.
    pub host: HostSlot,
    /// Registered teams, insertion-ordered.
    pub teams: IndexMap<String, Team>,
    /// Master catalog of biddable players.
    pub players: Vec<Player>,
    /// Filtered + sorted projection of `players` used for browsing.
    pub view_players: Vec<Player>,
    /// Cursor into `view_players`.
    pub current_index: usize,
    /// Whether the automatic catalog roll is running.
    pub rolling: bool,
    /// Role filter applied to the view.
    pub filter_role: RoleFilter,
    /// Case-insensitive name substring filter applied to the view.
    pub filter_name: String,
    /// Append-only sale ledger.
    pub history: Vec<SaleRecord>,
    /// Per-team last accepted bid timestamp, for retry-storm suppression.
    pub last_bid_at: HashMap<String, i64>,
    /// Last failed settlement, if any.
    pub last_assign_error: Option<AssignError>,
    /// Last roll advance timestamp. Never persisted.
    pub roll_tick_at: i64,
}

impl Room {
    /// Create a fresh room in the lobby phase.
    pub fn new(id: impl Into<String>, rules: AuctionRules, now: i64) -> Self {
        Self {
            id: id.into(),
            created_at: now,
            version: 0,
            session_epoch: 1,
            phase: Phase::Lobby,
            top_bid: 0,
            leader: None,
            deadline: 0,
            countdown_sec: 0,
            arm_ms: 2000,
            roll_ms: 1000,
            rules,
            host: HostSlot::default(),
            teams: IndexMap::new(),
            players: Vec::new(),
            view_players: Vec::new(),
            current_index: 0,
            rolling: false,
            filter_role: RoleFilter::All,
            filter_name: String::new(),
            history: Vec::new(),
            last_bid_at: HashMap::new(),
            last_assign_error: None,
            roll_tick_at: now,
        }
    }

    /// Bump the monotonic version after a mutation that is not a phase
    /// transition (transitions bump it themselves).
    pub fn touch(&mut self) {
        self.version += 1;
    }

    /// Move the room to `next`, resetting phase-coupled volatile fields.
    ///
    /// Idempotent: returns `false` without any effect when `next` equals the
    /// current phase. Callers are responsible for persisting and broadcasting
    /// after an applied transition.
    pub fn transition(&mut self, next: Phase, now: i64) -> bool {
        if self.phase == next {
            return false;
        }
        self.phase = next;

        match next {
            Phase::Lobby | Phase::Rolling => {
                self.top_bid = 0;
                self.leader = None;
                self.rolling = false;
                self.deadline = 0;
                self.countdown_sec = 0;
                self.last_bid_at.clear();
                self.last_assign_error = None;
            }
            Phase::Running => {
                self.rolling = false;
                self.deadline = 0;
                self.countdown_sec = 0;
                self.last_bid_at.clear();
            }
            Phase::Armed => {
                self.deadline = now + self.arm_ms;
                self.countdown_sec = 0;
            }
            Phase::Countdown => {
                self.countdown_sec = COUNTDOWN_START_SEC;
                self.deadline = now + COUNTDOWN_TICK_MS;
            }
            Phase::Sold => {
                self.deadline = 0;
                self.countdown_sec = 0;
            }
        }

        self.version += 1;
        true
    }

    /// Arm (or re-arm) the closing window after an accepted bid.
    ///
    /// Every accepted bid extends the close window, so when the room is
    /// already `Armed` the deadline is pushed out directly rather than going
    /// through the idempotent [`Room::transition`].
    pub fn arm(&mut self, now: i64) {
        if self.phase == Phase::Armed {
            self.deadline = now + self.arm_ms;
            self.version += 1;
        } else {
            self.transition(Phase::Armed, now);
        }
    }

    /// The player currently offered, if the view is non-empty.
    pub fn current_player(&self) -> Option<&Player> {
        self.view_players.get(self.current_index)
    }

    /// Append a pending sale row snapshotting the current leader and offered
    /// player. Returns `None` when there is no leader.
    pub fn mk_history_pending(&mut self, now: i64) -> Option<&SaleRecord> {
        let leader_id = self.leader.clone()?;
        let team = self.teams.get(&leader_id)?;
        let (team_id, team_name) = (team.id.clone(), team.name.clone());
        let current = self.current_player().cloned();

        let entry = SaleRecord {
            id: Uuid::new_v4().to_string(),
            at: now,
            session_epoch: self.session_epoch,
            team_id,
            team_name,
            price: self.top_bid,
            player_name: current.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
            role: current.as_ref().map(|p| p.role).unwrap_or(Role::P),
            player_club: current.as_ref().map(|p| p.club.clone()).unwrap_or_default(),
            player_rating: current.as_ref().and_then(|p| p.rating),
            player_key: current.as_ref().and_then(Player::key),
            finalized: false,
            finalized_at: None,
        };

        self.history.push(entry);
        self.history.last()
    }
}

/// Generate an opaque session/bearer key.
pub fn make_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Normalize a team name into a slug usable as an identifier: accent-folded,
/// uppercased, non-alphanumeric runs collapsed to `-`, at most 16 characters.
pub fn slugify_name(name: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for ch in name.chars().flat_map(fold_accent).flat_map(char::to_uppercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
            if slug.len() >= 16 {
                break;
            }
        } else {
            pending_dash = true;
        }
    }
    let slug: String = slug.chars().take(16).collect();
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "TEAM".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Map common Latin accented characters onto their ASCII base letter.
fn fold_accent(ch: char) -> std::iter::Once<char> {
    let folded = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'a',
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => 'u',
        'ç' | 'Ç' => 'c',
        'ñ' | 'Ñ' => 'n',
        other => other,
    };
    std::iter::once(folded)
}

/// Derive a team id unique within the room from a slug base, appending a
/// numeric suffix on collision.
pub fn unique_team_id(teams: &IndexMap<String, Team>, base: &str) -> String {
    if !teams.contains_key(base) {
        return base.to_string();
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !teams.contains_key(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> Room {
        Room::new("TEST", AuctionRules::default(), 1_000)
    }

    #[test]
    fn transition_is_idempotent() {
        let mut r = room();
        let v = r.version;
        assert!(!r.transition(Phase::Lobby, 1_000));
        assert_eq!(r.version, v);
    }

    #[test]
    fn armed_sets_deadline_from_arm_window() {
        let mut r = room();
        r.transition(Phase::Rolling, 1_000);
        r.transition(Phase::Running, 1_000);
        r.transition(Phase::Armed, 5_000);
        assert_eq!(r.deadline, 5_000 + r.arm_ms);
    }

    #[test]
    fn rearming_extends_the_deadline() {
        let mut r = room();
        r.transition(Phase::Running, 0);
        r.arm(1_000);
        let first = r.deadline;
        r.arm(2_500);
        assert_eq!(r.deadline, 2_500 + r.arm_ms);
        assert!(r.deadline > first);
    }

    #[test]
    fn countdown_starts_at_three() {
        let mut r = room();
        r.transition(Phase::Armed, 0);
        r.transition(Phase::Countdown, 10_000);
        assert_eq!(r.countdown_sec, COUNTDOWN_START_SEC);
        assert_eq!(r.deadline, 10_000 + COUNTDOWN_TICK_MS);
    }

    #[test]
    fn rolling_clears_bid_state() {
        let mut r = room();
        r.transition(Phase::Running, 0);
        r.top_bid = 40;
        r.leader = Some("X".into());
        r.last_bid_at.insert("X".into(), 5);
        r.transition(Phase::Rolling, 0);
        assert_eq!(r.top_bid, 0);
        assert!(r.leader.is_none());
        assert!(r.last_bid_at.is_empty());
    }

    #[test]
    fn pending_sale_snapshots_leader_and_player() {
        let mut r = room();
        r.players.push(Player {
            name: "Rossi".into(),
            role: Role::A,
            club: "Milan".into(),
            rating: Some(6.5),
        });
        r.view_players = r.players.clone();
        r.teams.insert(
            "ALPHA".into(),
            Team {
                id: "ALPHA".into(),
                name: "Alpha".into(),
                credits: 100,
                acquisitions: vec![],
                key: make_key(),
                session_epoch: 1,
                conn: None,
            },
        );
        r.leader = Some("ALPHA".into());
        r.top_bid = 30;

        let entry = r.mk_history_pending(99).unwrap();
        assert_eq!(entry.price, 30);
        assert_eq!(entry.player_name, "Rossi");
        assert_eq!(entry.player_key.as_deref(), Some("rossi#A#milan#6.5"));
        assert!(!entry.finalized);
    }

    #[test]
    fn pending_sale_requires_a_leader() {
        let mut r = room();
        assert!(r.mk_history_pending(0).is_none());
        assert!(r.history.is_empty());
    }

    #[test]
    fn player_key_never_degrades_to_name_alone() {
        assert_eq!(
            player_key(" Rossi ", Role::A, "Milan", Some(6.0)).as_deref(),
            Some("rossi#A#milan#6")
        );
        assert_eq!(
            player_key("Rossi", Role::A, "", None).as_deref(),
            Some("rossi#A##")
        );
        assert!(player_key("  ", Role::A, "Milan", None).is_none());
    }

    #[test]
    fn slugify_folds_accents_and_collapses_runs() {
        assert_eq!(slugify_name("Città del Pallone!"), "CITTA-DEL-PALLON");
        assert_eq!(slugify_name("  "), "TEAM");
        assert_eq!(slugify_name("a b"), "A-B");
    }

    #[test]
    fn unique_team_id_appends_counter() {
        let mut teams = IndexMap::new();
        teams.insert(
            "ALPHA".to_string(),
            Team {
                id: "ALPHA".into(),
                name: "Alpha".into(),
                credits: 0,
                acquisitions: vec![],
                key: make_key(),
                session_epoch: 1,
                conn: None,
            },
        );
        assert_eq!(unique_team_id(&teams, "BETA"), "BETA");
        assert_eq!(unique_team_id(&teams, "ALPHA"), "ALPHA-2");
    }
}
