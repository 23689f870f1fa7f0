//! Outbound WebSocket messages, acknowledgements, and SSE payloads.

use serde::Serialize;
use serde_json::Value;
use serde_with::skip_serializing_none;

use crate::{
    dto::view::RoomView,
    state::room::{AssignSource, Role},
};

/// Messages pushed to observer WebSocket clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full per-observer snapshot of the room.
    State(RoomView),
    /// Assigned client identity, sent once after the handshake.
    ClientId {
        /// Stable identity the client should persist and resend.
        client_id: String,
    },
    /// A sale was settled.
    Sold(SoldEvent),
    /// The observer's team was removed by the host.
    Kicked {
        /// Human-readable reason.
        reason: String,
    },
    /// The observer's session key was rotated by a resume elsewhere.
    SessionRevoked,
    /// Acknowledgement of one inbound command.
    Ack(Ack),
}

/// Broadcast when a sale settles, whatever the trigger path.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SoldEvent {
    /// Ledger row id.
    pub sale_id: String,
    /// Winning team id.
    pub team_id: String,
    /// Winning team name.
    pub team_name: String,
    /// Price awarded.
    pub price: u32,
    /// Player name.
    pub player_name: String,
    /// Player role.
    pub role: Role,
    /// Player club, when known.
    pub player_club: Option<String>,
    /// Which trigger path settled the sale.
    pub source: AssignSource,
    /// Settlement timestamp, epoch milliseconds.
    pub emitted_at: i64,
}

/// Acknowledgement of one inbound command, correlated by `seq`.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// Echo of the client-chosen sequence number.
    pub seq: Option<u64>,
    /// Whether the command was accepted.
    pub ok: bool,
    /// Failure description when `ok` is false.
    pub error: Option<String>,
    /// Soft-rule warning attached to an accepted command.
    pub warn: Option<String>,
    /// Command-specific result payload.
    pub data: Option<Value>,
}

impl Ack {
    /// Plain success acknowledgement.
    pub fn ok(seq: Option<u64>) -> Self {
        Self {
            seq,
            ok: true,
            error: None,
            warn: None,
            data: None,
        }
    }

    /// Success acknowledgement carrying a result payload.
    pub fn with_data(seq: Option<u64>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok(seq)
        }
    }

    /// Failure acknowledgement.
    pub fn err(seq: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            seq,
            ok: false,
            error: Some(message.into()),
            warn: None,
            data: None,
        }
    }

    /// Attach a soft-rule warning.
    pub fn warned(mut self, warn: Option<String>) -> Self {
        self.warn = warn;
        self
    }
}

#[derive(Clone, Debug)]
/// Dispatched payload carried across the SSE channel.
pub struct ServerEvent {
    /// Optional SSE event name.
    pub event: Option<String>,
    /// Serialized JSON data field.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_serializes_without_empty_fields() {
        let json = serde_json::to_value(ServerMessage::Ack(Ack::ok(Some(3)))).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["data"]["seq"], 3);
        assert_eq!(json["data"]["ok"], true);
        assert!(json["data"].get("error").is_none());
    }

    #[test]
    fn ack_builders_carry_payload_and_warning() {
        let ack = Ack::with_data(Some(7), serde_json::json!({"topBid": 12}))
            .warned(Some("soft rule".into()));
        let json = serde_json::to_value(ServerMessage::Ack(ack)).unwrap();
        assert_eq!(json["data"]["ok"], true);
        assert_eq!(json["data"]["data"]["topBid"], 12);
        assert_eq!(json["data"]["warn"], "soft rule");

        let plain = Ack::ok(Some(8)).warned(None);
        let json = serde_json::to_value(ServerMessage::Ack(plain)).unwrap();
        assert!(json["data"].get("warn").is_none());
    }

    #[test]
    fn sold_event_carries_its_source() {
        let event = ServerMessage::Sold(SoldEvent {
            sale_id: "s1".into(),
            team_id: "ALPHA".into(),
            team_name: "Alpha".into(),
            price: 30,
            player_name: "Rossi".into(),
            role: Role::A,
            player_club: None,
            source: AssignSource::Auto,
            emitted_at: 99,
        });
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["type"], "sold");
        assert_eq!(json["data"]["source"], "auto");
    }
}
