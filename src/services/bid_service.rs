//! Bid arbitration: validation pipeline, retry-storm suppression, and the
//! commit that re-arms the closing window.

use crate::{
    error::ServiceError,
    state::{
        phase::Phase,
        room::{Role, Room},
    },
};

/// Spacing under which a team's repeat bid is swallowed as a retry.
const TEAM_DEBOUNCE_MS: i64 = 80;

/// The two bid shapes clients can send.
#[derive(Debug, Clone, Copy)]
pub enum BidKind {
    /// Raise the current top bid by a positive delta.
    Increment(i64),
    /// Place an absolute value strictly above the current top bid.
    Free(i64),
}

/// Outcome of an accepted (or silently swallowed) bid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidAck {
    /// False when the bid was swallowed by the retry debounce.
    pub accepted: bool,
    /// Top bid after the call.
    pub top_bid: u32,
    /// Soft roster-rule warning, when the rule is non-strict.
    pub warn: Option<String>,
}

/// Run the full arbitration pipeline for one bid.
///
/// Rejections return an error; a repeat bid inside the debounce window
/// returns `accepted: false` without error so client retry storms stay
/// silent. On acceptance the leader, top bid, and closing deadline are all
/// updated together.
pub fn place_bid(
    room: &mut Room,
    team_id: &str,
    kind: BidKind,
    now: i64,
) -> Result<BidAck, ServiceError> {
    if !room.phase.accepts_bids() {
        return Err(ServiceError::InvalidState(format!(
            "bids are closed in phase {:?}",
            room.phase
        )));
    }
    if !room.teams.contains_key(team_id) {
        return Err(ServiceError::NotFound(format!("unknown team {team_id}")));
    }
    if room.phase != Phase::Rolling && room.leader.as_deref() == Some(team_id) {
        return Err(ServiceError::InvalidState(
            "already leading; wait to be outbid".into(),
        ));
    }

    let next_bid = match kind {
        BidKind::Increment(delta) => {
            if delta <= 0 {
                return Err(ServiceError::InvalidInput(
                    "bid increment must be positive".into(),
                ));
            }
            i64::from(room.top_bid) + delta
        }
        BidKind::Free(value) => {
            if value <= 0 {
                return Err(ServiceError::InvalidInput("bid must be positive".into()));
            }
            if value <= i64::from(room.top_bid) {
                return Err(ServiceError::InvalidState(format!(
                    "bid must exceed the current top bid of {}",
                    room.top_bid
                )));
            }
            value
        }
    };
    let next_bid = u32::try_from(next_bid)
        .map_err(|_| ServiceError::InvalidInput("bid is out of range".into()))?;

    if let Some(last) = room.last_bid_at.get(team_id)
        && now - last < TEAM_DEBOUNCE_MS
    {
        return Ok(BidAck {
            accepted: false,
            top_bid: room.top_bid,
            warn: None,
        });
    }

    let team = &room.teams[team_id];
    if next_bid > team.credits && !room.rules.allow_overbid {
        return Err(ServiceError::InsufficientCredits);
    }
    let warn = match roster_budget_check(room, team_id, next_bid) {
        RosterCheck::Ok => None,
        RosterCheck::Violation(message) => {
            if room.rules.strict_rules {
                return Err(ServiceError::RosterRule);
            }
            Some(message)
        }
    };

    if room.phase == Phase::Rolling {
        room.transition(Phase::Running, now);
    }
    room.top_bid = next_bid;
    room.leader = Some(team_id.to_string());
    room.last_bid_at.insert(team_id.to_string(), now);
    room.arm(now);

    Ok(BidAck {
        accepted: true,
        top_bid: next_bid,
        warn,
    })
}

/// Result of the per-slot credit reserve check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterCheck {
    /// The price leaves enough reserve, or the rule is disabled.
    Ok,
    /// Paying would leave less than the mandatory reserve.
    Violation(String),
}

/// Check whether paying `price` would leave `team_id` unable to reserve the
/// minimum credit for each roster slot still to fill.
///
/// Open slots are counted per role, so overshooting one role never loosens
/// the reserve held for the others. Teams with an empty roster are exempt:
/// the reserve only starts binding after the first purchase.
pub fn roster_budget_check(room: &Room, team_id: &str, price: u32) -> RosterCheck {
    let rules = &room.rules;
    if !rules.enable_roster_budget || rules.min_credit_per_slot == 0 {
        return RosterCheck::Ok;
    }
    let Some(team) = room.teams.get(team_id) else {
        return RosterCheck::Ok;
    };
    if team.acquisitions.is_empty() {
        return RosterCheck::Ok;
    }

    let missing: u32 = [Role::P, Role::D, Role::C, Role::A]
        .into_iter()
        .map(|role| {
            let have = team.acquisitions.iter().filter(|acq| acq.role == role).count() as u32;
            rules.slots.get(role).saturating_sub(have)
        })
        .sum();
    if missing == 0 {
        return RosterCheck::Ok;
    }

    let required = missing * rules.min_credit_per_slot;
    let credits_after = team.credits.saturating_sub(price);
    if price > team.credits || credits_after < required {
        RosterCheck::Violation(format!(
            "paying {price} leaves {credits_after} credits but {required} are reserved for {missing} open slots"
        ))
    } else {
        RosterCheck::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AuctionRules,
        state::room::{Acquisition, Role, Team, make_key},
    };

    fn team(id: &str, credits: u32) -> Team {
        Team {
            id: id.into(),
            name: id.into(),
            credits,
            acquisitions: vec![],
            key: make_key(),
            session_epoch: 1,
            conn: None,
        }
    }

    fn room_in_running() -> Room {
        let mut room = Room::new("TEST", AuctionRules::default(), 0);
        room.teams.insert("ALPHA".into(), team("ALPHA", 100));
        room.teams.insert("BETA".into(), team("BETA", 100));
        room.transition(Phase::Running, 0);
        room
    }

    #[test]
    fn bids_are_rejected_outside_bidding_phases() {
        let mut room = Room::new("TEST", AuctionRules::default(), 0);
        room.teams.insert("ALPHA".into(), team("ALPHA", 100));
        let err = place_bid(&mut room, "ALPHA", BidKind::Increment(1), 0);
        assert!(matches!(err, Err(ServiceError::InvalidState(_))));
    }

    #[test]
    fn accepted_bid_sets_leader_and_arms_the_deadline() {
        let mut room = room_in_running();
        let ack = place_bid(&mut room, "ALPHA", BidKind::Increment(5), 1_000).unwrap();
        assert!(ack.accepted);
        assert_eq!(room.top_bid, 5);
        assert_eq!(room.leader.as_deref(), Some("ALPHA"));
        assert_eq!(room.phase, Phase::Armed);
        assert_eq!(room.deadline, 1_000 + room.arm_ms);
    }

    #[test]
    fn top_bid_is_strictly_monotonic() {
        let mut room = room_in_running();
        place_bid(&mut room, "ALPHA", BidKind::Free(10), 0).unwrap();
        let err = place_bid(&mut room, "BETA", BidKind::Free(10), 1_000);
        assert!(matches!(err, Err(ServiceError::InvalidState(_))));
        assert_eq!(room.top_bid, 10);
    }

    #[test]
    fn current_leader_cannot_rebid() {
        let mut room = room_in_running();
        place_bid(&mut room, "ALPHA", BidKind::Increment(1), 0).unwrap();
        let err = place_bid(&mut room, "ALPHA", BidKind::Increment(1), 1_000);
        assert!(matches!(err, Err(ServiceError::InvalidState(_))));
    }

    #[test]
    fn counter_bid_extends_the_deadline() {
        let mut room = room_in_running();
        place_bid(&mut room, "ALPHA", BidKind::Increment(1), 1_000).unwrap();
        place_bid(&mut room, "BETA", BidKind::Increment(1), 2_500).unwrap();
        assert_eq!(room.deadline, 2_500 + room.arm_ms);
        assert_eq!(room.phase, Phase::Armed);
    }

    #[test]
    fn rapid_repeat_from_one_team_is_swallowed() {
        let mut room = room_in_running();
        place_bid(&mut room, "ALPHA", BidKind::Increment(1), 1_000).unwrap();
        place_bid(&mut room, "BETA", BidKind::Increment(1), 1_010).unwrap();
        // Alpha retries 30ms after its own accepted bid.
        let ack = place_bid(&mut room, "ALPHA", BidKind::Increment(1), 1_030).unwrap();
        assert!(!ack.accepted);
        assert_eq!(room.top_bid, 2);
    }

    #[test]
    fn bid_beyond_credits_is_rejected_unless_overbid_allowed() {
        let mut room = room_in_running();
        let err = place_bid(&mut room, "ALPHA", BidKind::Free(101), 0);
        assert!(matches!(err, Err(ServiceError::InsufficientCredits)));

        room.rules.allow_overbid = true;
        let ack = place_bid(&mut room, "ALPHA", BidKind::Free(101), 200).unwrap();
        assert!(ack.accepted);
    }

    fn acquisition(role: Role) -> Acquisition {
        Acquisition {
            player: "someone".into(),
            role,
            price: 1,
            at: 0,
        }
    }

    #[test]
    fn strict_roster_rule_rejects_at_bid_time() {
        let mut room = room_in_running();
        room.rules.enable_roster_budget = true;
        room.rules.strict_rules = true;
        room.rules.min_credit_per_slot = 1;
        // One of 25 slots filled: 24 still open, so 24 credits stay reserved.
        let team = room.teams.get_mut("ALPHA").unwrap();
        team.acquisitions.push(acquisition(Role::C));
        let err = place_bid(&mut room, "ALPHA", BidKind::Free(90), 0);
        assert!(matches!(err, Err(ServiceError::RosterRule)));
    }

    #[test]
    fn soft_roster_rule_warns_but_accepts() {
        let mut room = room_in_running();
        room.rules.enable_roster_budget = true;
        room.rules.min_credit_per_slot = 1;
        let team = room.teams.get_mut("ALPHA").unwrap();
        team.acquisitions.push(acquisition(Role::C));
        let ack = place_bid(&mut room, "ALPHA", BidKind::Free(90), 0).unwrap();
        assert!(ack.accepted);
        assert!(ack.warn.is_some());
    }

    #[test]
    fn roster_rule_holds_on_the_last_open_slot() {
        let mut room = room_in_running();
        room.rules.enable_roster_budget = true;
        room.rules.strict_rules = true;
        room.rules.min_credit_per_slot = 10;
        room.rules.slots = crate::config::RoleSlots { p: 0, d: 0, c: 2, a: 0 };
        let team = room.teams.get_mut("ALPHA").unwrap();
        team.credits = 15;
        team.acquisitions.push(acquisition(Role::C));
        // One slot left: paying 10 leaves 5 against the 10 reserved for it.
        let err = place_bid(&mut room, "ALPHA", BidKind::Free(10), 0);
        assert!(matches!(err, Err(ServiceError::RosterRule)));
    }

    #[test]
    fn roster_rule_skips_teams_with_an_empty_roster() {
        let mut room = room_in_running();
        room.rules.enable_roster_budget = true;
        room.rules.strict_rules = true;
        room.rules.min_credit_per_slot = 10;
        let ack = place_bid(&mut room, "ALPHA", BidKind::Free(90), 0).unwrap();
        assert!(ack.accepted);
        assert!(ack.warn.is_none());
    }

    #[test]
    fn roster_rule_ignores_teams_with_a_full_roster() {
        let mut room = room_in_running();
        room.rules.enable_roster_budget = true;
        room.rules.min_credit_per_slot = 5;
        let slots = room.rules.slots;
        let team = room.teams.get_mut("ALPHA").unwrap();
        for role in [Role::P, Role::D, Role::C, Role::A] {
            for _ in 0..slots.get(role) {
                team.acquisitions.push(acquisition(role));
            }
        }
        assert_eq!(roster_budget_check(&room, "ALPHA", 100), RosterCheck::Ok);
    }

    #[test]
    fn overfilled_role_does_not_loosen_the_reserve() {
        let mut room = room_in_running();
        room.rules.enable_roster_budget = true;
        room.rules.min_credit_per_slot = 5;
        let team = room.teams.get_mut("ALPHA").unwrap();
        // 25 midfielders overshoot the C target but P, D, and A stay open.
        for _ in 0..25 {
            team.acquisitions.push(acquisition(Role::C));
        }
        assert!(matches!(
            roster_budget_check(&room, "ALPHA", 100),
            RosterCheck::Violation(_)
        ));
    }

    #[test]
    fn bid_during_rolling_opens_the_round() {
        let mut room = room_in_running();
        room.transition(Phase::Rolling, 0);
        let ack = place_bid(&mut room, "ALPHA", BidKind::Increment(3), 100).unwrap();
        assert!(ack.accepted);
        assert_eq!(room.phase, Phase::Armed);
        assert_eq!(room.top_bid, 3);
    }
}
