//! Inbound WebSocket command frames.

use serde::Deserialize;
use validator::Validate;

/// One inbound client frame: an optional client sequence number plus the
/// command itself. The sequence number is echoed back in the acknowledgement.
#[derive(Debug, Deserialize)]
pub struct CommandEnvelope {
    /// Client-chosen correlation number.
    #[serde(default)]
    pub seq: Option<u64>,
    /// The command payload.
    #[serde(flatten)]
    pub command: ClientCommand,
}

/// Commands accepted from observer WebSocket clients.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Register a new team bound to this connection.
    Register(RegisterPayload),
    /// Resume a previously registered team using its bearer key.
    Resume {
        /// Team to resume.
        team_id: String,
        /// Bearer key issued at registration.
        key: String,
    },
    /// Claim or release the host slot.
    HostToggle {
        /// Shared PIN, when one is configured.
        #[serde(default)]
        pin: Option<String>,
    },
    /// Reclaim the host slot after a disconnect using the issued token.
    HostReclaim {
        /// Token issued when the slot was last claimed.
        token: String,
    },
    /// Set the case-insensitive catalog name query.
    SetFilterName {
        /// Substring to match against player names.
        #[serde(default)]
        q: String,
    },
    /// Set the catalog role filter (`ALL` or a role letter).
    SetRoleFilter {
        /// Filter value.
        role: String,
    },
    /// Jump to a random starting letter and leave the lobby.
    RandomStart,
    /// Start or stop the automatic catalog roll.
    ToggleRoll,
    /// Stop the automatic catalog roll.
    StopRoll,
    /// Change the roll advance interval.
    SetRollMs {
        /// Interval in milliseconds, clamped server-side.
        ms: i64,
    },
    /// Advance the catalog cursor by one.
    Skip,
    /// Move the catalog cursor back by up to ten entries.
    BackN {
        /// Steps back.
        #[serde(default = "one")]
        n: usize,
    },
    /// Pin the catalog cursor to an absolute view index.
    PinIndex {
        /// Target index into the current view.
        index: usize,
    },
    /// Raise the current bid by a relative amount.
    BidIncrement {
        /// Increment over the current top bid.
        amount: i64,
    },
    /// Place an absolute bid.
    BidFree {
        /// Absolute bid value.
        value: i64,
    },
    /// Settle the pending sale.
    FinalizeSale,
    /// Force-assign a catalog player to a team at a price.
    AssignPlayer {
        /// Composite player identity within the catalog.
        player_id: String,
        /// Receiving team.
        team_id: String,
        /// Price to debit.
        price: u32,
    },
    /// Reverse a finalized sale.
    UndoSale {
        /// Ledger row to undo.
        sale_id: String,
    },
    /// Remove a team from the room.
    Kick {
        /// Team to remove.
        team_id: String,
    },
    /// Unregister the team bound to this connection.
    Leave,
    /// Rename the bound team or adjust its credits.
    UpdateProfile(UpdateProfilePayload),
    /// Wipe the room back to an empty lobby.
    Reset,
    /// Anything unrecognized; acknowledged with an error.
    #[serde(other)]
    Unknown,
}

/// Payload of the `register` command.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    /// Team display name.
    #[validate(length(min = 1, max = 40, message = "name must be 1-40 characters"))]
    pub name: String,
    /// Starting credits; defaults to the room standard.
    #[serde(default)]
    pub credits: Option<u32>,
}

/// Payload of the `updateProfile` command.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfilePayload {
    /// New display name, when renaming.
    #[validate(length(min = 1, max = 40, message = "name must be 1-40 characters"))]
    pub name: Option<String>,
    /// New credit balance, when adjusting.
    pub credits: Option<u32>,
}

fn one() -> usize {
    1
}
