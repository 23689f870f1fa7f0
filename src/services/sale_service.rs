//! Sale settlement: the single settlement routine shared by the timer, the
//! explicit finalize command, and host manual assignment, plus undo.

use tracing::info;

use crate::{
    dto::event::SoldEvent,
    error::{FinalizeError, ServiceError},
    services::bid_service::{RosterCheck, roster_budget_check},
    state::{
        catalog::{add_back_to_catalog, remove_from_catalog},
        phase::Phase,
        room::{Acquisition, AssignError, AssignSource, Room, SaleRecord},
    },
};

/// A settled sale ready to broadcast.
#[derive(Debug, Clone)]
pub struct FinalizedSale {
    /// Event to fan out to every observer.
    pub event: SoldEvent,
    /// Soft roster-rule warning, when the rule is non-strict.
    pub warn: Option<String>,
}

/// Settle the pending sale row, whatever path triggered it.
///
/// Idempotent by design: with no pending row, or a row that was already
/// settled, the call reports a no-op instead of failing, so the countdown
/// timer and an explicit finalize command can race without double-charging.
/// Validation is re-run here because credits may have moved between the
/// countdown close and settlement.
pub fn finalize_pending_sale(
    room: &mut Room,
    source: AssignSource,
    now: i64,
) -> Result<FinalizedSale, FinalizeError> {
    if room.phase != Phase::Sold {
        return Err(FinalizeError::NothingPending);
    }
    let Some(pending) = room
        .history
        .iter()
        .rev()
        .find(|sale| sale.session_epoch == room.session_epoch)
        .cloned()
    else {
        return Err(FinalizeError::NothingPending);
    };
    if pending.finalized {
        return Err(FinalizeError::AlreadyFinalized);
    }

    let Some(team) = room.teams.get(&pending.team_id) else {
        return Err(FinalizeError::TeamMissing);
    };
    // Overbid permissiveness stops at submission: nothing ever settles
    // beyond the balance the team actually holds.
    if pending.price > team.credits {
        return Err(FinalizeError::InsufficientCredits {
            team_id: pending.team_id.clone(),
        });
    }
    let warn = match roster_budget_check(room, &pending.team_id, pending.price) {
        RosterCheck::Ok => None,
        RosterCheck::Violation(message) => {
            if room.rules.strict_rules {
                return Err(FinalizeError::RosterRule {
                    team_id: pending.team_id.clone(),
                });
            }
            Some(message)
        }
    };

    // Validation passed; commit.
    if let Some(team) = room.teams.get_mut(&pending.team_id) {
        team.credits = team.credits.saturating_sub(pending.price);
        team.acquisitions.push(Acquisition {
            player: pending.player_name.clone(),
            role: pending.role,
            price: pending.price,
            at: now,
        });
    }

    if let Some(row) = room.history.iter_mut().find(|sale| sale.id == pending.id) {
        row.finalized = true;
        row.finalized_at = Some(now);
    }
    remove_from_catalog(room, &pending);
    room.last_assign_error = None;
    room.transition(Phase::Rolling, now);

    info!(
        team = %pending.team_id,
        player = %pending.player_name,
        price = pending.price,
        source = ?source,
        "sale finalized"
    );

    Ok(FinalizedSale {
        event: SoldEvent {
            sale_id: pending.id,
            team_id: pending.team_id,
            team_name: pending.team_name,
            price: pending.price,
            player_name: pending.player_name,
            role: pending.role,
            player_club: (!pending.player_club.trim().is_empty()).then_some(pending.player_club),
            source,
            emitted_at: now,
        },
        warn,
    })
}

/// Record a failed settlement so every observer sees what went wrong until
/// the host corrects the sale.
pub fn record_assign_error(room: &mut Room, err: &FinalizeError, source: AssignSource, now: i64) {
    let pending = room
        .history
        .iter()
        .rev()
        .find(|sale| sale.session_epoch == room.session_epoch && !sale.finalized);
    room.last_assign_error = Some(AssignError {
        message: err.to_string(),
        team_id: pending.map(|sale| sale.team_id.clone()),
        team_name: pending.map(|sale| sale.team_name.clone()),
        price: pending.map(|sale| sale.price),
        player_name: pending.map(|sale| sale.player_name.clone()),
        role: pending.map(|sale| sale.role),
        at: now,
        source,
    });
    room.touch();
}

/// Host-forced assignment of a catalog player to a team at a fixed price.
///
/// Allowed only while no bid round is open. Internally stages a pending sale
/// and runs it through the shared settlement routine; any failure rolls the
/// room back to exactly the state it had before the call.
pub fn manual_assign(
    room: &mut Room,
    player_id: &str,
    team_id: &str,
    price: u32,
    now: i64,
) -> Result<FinalizedSale, ServiceError> {
    if room.phase.is_bidding_locked() || room.phase == Phase::Sold {
        return Err(ServiceError::InvalidState(
            "cannot assign while a bid round is open".into(),
        ));
    }
    let Some(player) = room
        .players
        .iter()
        .find(|p| p.key().as_deref() == Some(player_id))
        .cloned()
    else {
        return Err(ServiceError::NotFound(format!(
            "unknown player {player_id}"
        )));
    };
    let Some(team) = room.teams.get(team_id) else {
        return Err(ServiceError::NotFound(format!("unknown team {team_id}")));
    };
    let (team_id, team_name) = (team.id.clone(), team.name.clone());

    let prev_phase = room.phase;
    let prev_top = room.top_bid;
    let prev_leader = room.leader.clone();
    let prev_version = room.version;

    room.history.push(SaleRecord {
        id: uuid::Uuid::new_v4().to_string(),
        at: now,
        session_epoch: room.session_epoch,
        team_id: team_id.clone(),
        team_name,
        price,
        player_name: player.name.clone(),
        role: player.role,
        player_club: player.club.clone(),
        player_rating: player.rating,
        player_key: player.key(),
        finalized: false,
        finalized_at: None,
    });
    room.top_bid = price;
    room.leader = Some(team_id);
    room.phase = Phase::Sold;

    match finalize_pending_sale(room, AssignSource::Manual, now) {
        Ok(sale) => Ok(sale),
        Err(err) => {
            room.history.pop();
            room.phase = prev_phase;
            room.top_bid = prev_top;
            room.leader = prev_leader;
            room.version = prev_version;
            Err(match err {
                FinalizeError::InsufficientCredits { .. } => ServiceError::InsufficientCredits,
                FinalizeError::RosterRule { .. } => ServiceError::RosterRule,
                FinalizeError::TeamMissing => {
                    ServiceError::NotFound("winning team is gone".into())
                }
                other => ServiceError::InvalidState(other.to_string()),
            })
        }
    }
}

/// Reverse a finalized sale: refund the credits, take the item off the
/// roster, and put the player back into the catalog.
pub fn undo_sale(room: &mut Room, sale_id: &str, now: i64) -> Result<(), ServiceError> {
    if room.phase.is_bidding_locked() {
        return Err(ServiceError::InvalidState(
            "cannot undo while a bid round is open".into(),
        ));
    }
    let Some(idx) = room.history.iter().position(|sale| sale.id == sale_id) else {
        return Err(ServiceError::NotFound(format!("unknown sale {sale_id}")));
    };
    if !room.history[idx].finalized {
        return Err(ServiceError::InvalidState(
            "sale was never finalized".into(),
        ));
    }
    let sale = room.history.remove(idx);

    // The team may have left since; refund only if it still exists.
    if let Some(team) = room.teams.get_mut(&sale.team_id) {
        team.credits += sale.price;
        if let Some(pos) = team.acquisitions.iter().position(|acq| {
            acq.player == sale.player_name && acq.role == sale.role && acq.price == sale.price
        }) {
            team.acquisitions.remove(pos);
        }
    }

    let club = (!sale.player_club.trim().is_empty()).then_some(sale.player_club.as_str());
    add_back_to_catalog(room, &sale.player_name, sale.role, club, sale.player_rating);
    room.top_bid = 0;
    room.leader = None;
    room.touch();

    info!(sale = %sale.id, team = %sale.team_id, player = %sale.player_name, at = now, "sale undone");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AuctionRules,
        state::room::{Player, Role, Team, make_key},
    };

    fn seeded_room() -> Room {
        let mut room = Room::new("TEST", AuctionRules::default(), 0);
        room.players.push(Player {
            name: "Rossi".into(),
            role: Role::A,
            club: "Milan".into(),
            rating: Some(6.5),
        });
        room.view_players = room.players.clone();
        room.teams.insert(
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
        room
    }

    fn stage_pending(room: &mut Room, price: u32) {
        room.transition(Phase::Running, 0);
        room.top_bid = price;
        room.leader = Some("ALPHA".into());
        room.transition(Phase::Sold, 10);
        room.mk_history_pending(10).unwrap();
    }

    #[test]
    fn finalize_debits_and_returns_to_rolling() {
        let mut room = seeded_room();
        stage_pending(&mut room, 30);

        let sale = finalize_pending_sale(&mut room, AssignSource::Auto, 20).unwrap();
        assert_eq!(sale.event.price, 30);
        let team = &room.teams["ALPHA"];
        assert_eq!(team.credits, 70);
        assert_eq!(team.acquisitions.len(), 1);
        assert!(room.players.is_empty());
        assert_eq!(room.phase, Phase::Rolling);
        assert!(room.history[0].finalized);
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut room = seeded_room();
        stage_pending(&mut room, 30);
        finalize_pending_sale(&mut room, AssignSource::Auto, 20).unwrap();

        // The phase already left SOLD, so a retry is a silent no-op.
        let err = finalize_pending_sale(&mut room, AssignSource::Finalize, 30).unwrap_err();
        assert!(err.is_noop());
        assert_eq!(room.teams["ALPHA"].credits, 70);
    }

    #[test]
    fn finalize_without_credits_keeps_the_pending_row() {
        let mut room = seeded_room();
        room.teams.get_mut("ALPHA").unwrap().credits = 10;
        stage_pending(&mut room, 30);

        let err = finalize_pending_sale(&mut room, AssignSource::Auto, 20).unwrap_err();
        assert!(matches!(err, FinalizeError::InsufficientCredits { .. }));
        assert!(!err.is_noop());
        assert_eq!(room.phase, Phase::Sold);
        assert!(!room.history[0].finalized);
        assert_eq!(room.teams["ALPHA"].credits, 10);

        record_assign_error(&mut room, &err, AssignSource::Auto, 21);
        let recorded = room.last_assign_error.as_ref().unwrap();
        assert_eq!(recorded.team_id.as_deref(), Some("ALPHA"));
        assert_eq!(recorded.price, Some(30));
    }

    #[test]
    fn finalize_refuses_overbid_beyond_the_balance() {
        let mut room = seeded_room();
        room.rules.allow_overbid = true;
        room.teams.get_mut("ALPHA").unwrap().credits = 50;
        stage_pending(&mut room, 101);

        let err = finalize_pending_sale(&mut room, AssignSource::Auto, 20).unwrap_err();
        assert!(matches!(err, FinalizeError::InsufficientCredits { .. }));
        assert_eq!(room.phase, Phase::Sold);
        assert!(!room.history[0].finalized);
        assert_eq!(room.teams["ALPHA"].credits, 50);
    }

    #[test]
    fn manual_assign_settles_directly() {
        let mut room = seeded_room();
        let player_id = room.players[0].key().unwrap();
        let sale = manual_assign(&mut room, &player_id, "ALPHA", 40, 5).unwrap();
        assert_eq!(sale.event.source, AssignSource::Manual);
        assert_eq!(room.teams["ALPHA"].credits, 60);
        assert!(room.players.is_empty());
        assert_eq!(room.phase, Phase::Rolling);
    }

    #[test]
    fn manual_assign_rolls_back_completely_on_failure() {
        let mut room = seeded_room();
        room.transition(Phase::Rolling, 0);
        let version = room.version;
        let player_id = room.players[0].key().unwrap();

        let err = manual_assign(&mut room, &player_id, "ALPHA", 500, 5).unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientCredits));
        assert_eq!(room.phase, Phase::Rolling);
        assert_eq!(room.top_bid, 0);
        assert!(room.leader.is_none());
        assert!(room.history.is_empty());
        assert_eq!(room.version, version);
        assert_eq!(room.players.len(), 1);
    }

    #[test]
    fn manual_assign_is_blocked_during_a_bid_round() {
        let mut room = seeded_room();
        room.transition(Phase::Armed, 0);
        let player_id = room.players[0].key().unwrap();
        let err = manual_assign(&mut room, &player_id, "ALPHA", 10, 5).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[test]
    fn undo_refunds_and_restores_the_catalog() {
        let mut room = seeded_room();
        stage_pending(&mut room, 30);
        finalize_pending_sale(&mut room, AssignSource::Auto, 20).unwrap();
        let sale_id = room.history[0].id.clone();

        undo_sale(&mut room, &sale_id, 50).unwrap();
        let team = &room.teams["ALPHA"];
        assert_eq!(team.credits, 100);
        assert!(team.acquisitions.is_empty());
        assert_eq!(room.players.len(), 1);
        assert_eq!(room.players[0].name, "Rossi");
        assert!(room.history.is_empty());
    }

    #[test]
    fn undo_requires_a_finalized_row() {
        let mut room = seeded_room();
        stage_pending(&mut room, 30);
        let sale_id = room.history[0].id.clone();
        room.transition(Phase::Lobby, 11);

        let err = undo_sale(&mut room, &sale_id, 50).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert_eq!(room.teams["ALPHA"].credits, 100);
        assert_eq!(room.history.len(), 1);
    }
}
