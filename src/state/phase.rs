//! Auction lifecycle phases and their gating predicates.

use serde::{Deserialize, Serialize};

/// Number of seconds displayed when the closing countdown begins.
pub const COUNTDOWN_START_SEC: u8 = 3;
/// Interval between two countdown decrements, in milliseconds.
pub const COUNTDOWN_TICK_MS: i64 = 1000;

/// Lifecycle phases of an auction room.
///
/// The nominal flow is `Lobby → Rolling ⇄ Running → Armed → Countdown → Sold →
/// Rolling → …`. `Lobby` is only ever seen before a host has claimed the room
/// (or after a full reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// No host has claimed the room yet; teams can register and wait.
    Lobby,
    /// The catalog roll is browsable; the next bid opens an auction.
    Rolling,
    /// A first bid stopped the roll and the auction is live.
    Running,
    /// A bid was accepted; the closing window is armed.
    Armed,
    /// The armed window elapsed; final seconds tick down.
    Countdown,
    /// The countdown expired with a leader; a pending sale awaits settlement.
    Sold,
}

impl Phase {
    /// Whether bids are accepted in this phase.
    pub fn accepts_bids(self) -> bool {
        matches!(
            self,
            Phase::Rolling | Phase::Running | Phase::Armed | Phase::Countdown
        )
    }

    /// Whether an auction is in flight, locking out host operations that would
    /// corrupt it (filter changes, catalog navigation, kicks, undo).
    pub fn is_bidding_locked(self) -> bool {
        matches!(self, Phase::Running | Phase::Armed | Phase::Countdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bids_accepted_in_active_phases_only() {
        assert!(!Phase::Lobby.accepts_bids());
        assert!(Phase::Rolling.accepts_bids());
        assert!(Phase::Running.accepts_bids());
        assert!(Phase::Armed.accepts_bids());
        assert!(Phase::Countdown.accepts_bids());
        assert!(!Phase::Sold.accepts_bids());
    }

    #[test]
    fn rolling_and_sold_are_not_bidding_locked() {
        assert!(!Phase::Rolling.is_bidding_locked());
        assert!(!Phase::Sold.is_bidding_locked());
        assert!(Phase::Countdown.is_bidding_locked());
    }

    #[test]
    fn serializes_to_screaming_case() {
        assert_eq!(
            serde_json::to_string(&Phase::Countdown).unwrap(),
            "\"COUNTDOWN\""
        );
    }
}
