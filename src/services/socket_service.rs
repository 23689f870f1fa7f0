//! WebSocket connection lifecycle and command dispatch.
//!
//! Every connection gets a dedicated writer task fed by an unbounded queue,
//! so broadcasts never block on a slow client. Commands are handled one at a
//! time per connection, each inside one room critical section that ends with
//! a broadcast, keeping snapshot versions ordered per observer.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        command::{ClientCommand, CommandEnvelope},
        event::{Ack, ServerMessage},
        view::RoomView,
    },
    error::ServiceError,
    services::{
        bid_service::{BidKind, place_bid},
        broadcast::{emit_sold, publish, send_message},
        host_service, sale_service, team_service,
    },
    state::{
        Connection, SharedState, now_ms,
        room::{AssignSource, ConnId},
    },
};

/// Spacing under which repeated bid frames from one connection are swallowed
/// before they even reach arbitration.
const CONN_BID_THROTTLE_MS: i64 = 120;

/// Handshake parameters presented as query parameters on `/ws`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    /// Stable client identity from a previous visit.
    pub client_id: Option<String>,
    /// Host bearer token for silent reclaim on reconnect.
    pub host_token: Option<String>,
}

/// Handle the full lifecycle for one observer WebSocket connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket, params: ConnectParams) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let conn_id: ConnId = Uuid::new_v4();
    let client_id = params
        .client_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    state.connections().insert(
        conn_id,
        Connection {
            id: conn_id,
            client_id: client_id.clone(),
            team_id: None,
            tx: outbound_tx.clone(),
        },
    );
    info!(conn = %conn_id, client = %client_id, "observer connected");

    send_message(
        &outbound_tx,
        &ServerMessage::ClientId {
            client_id: client_id.clone(),
        },
    );

    {
        let mut room = state.room().await;
        let recovered = match &params.host_token {
            Some(token) => {
                host_service::recover_on_connect(&mut room, conn_id, &client_id, token)
            }
            None => false,
        };
        if recovered {
            publish(&state, &room);
        } else {
            let view = RoomView::project(&room, None, Some(conn_id), now_ms());
            send_message(&outbound_tx, &ServerMessage::State(view));
        }
    }

    let mut last_bid_frame_at: i64 = 0;
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let envelope: CommandEnvelope = match serde_json::from_str(&text) {
                    Ok(envelope) => envelope,
                    Err(err) => {
                        send_message(
                            &outbound_tx,
                            &ServerMessage::Ack(Ack::err(None, format!("bad frame: {err}"))),
                        );
                        continue;
                    }
                };

                if matches!(
                    envelope.command,
                    ClientCommand::BidIncrement { .. } | ClientCommand::BidFree { .. }
                ) {
                    let now = now_ms();
                    if now - last_bid_frame_at < CONN_BID_THROTTLE_MS {
                        let top_bid = state.room().await.top_bid;
                        send_message(
                            &outbound_tx,
                            &ServerMessage::Ack(Ack::with_data(
                                envelope.seq,
                                json!({ "accepted": false, "topBid": top_bid }),
                            )),
                        );
                        continue;
                    }
                    last_bid_frame_at = now;
                }

                let ack = dispatch(&state, conn_id, &client_id, envelope).await;
                send_message(&outbound_tx, &ServerMessage::Ack(ack));
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(conn = %conn_id, error = %err, "websocket error");
                break;
            }
        }
    }

    state.connections().remove(&conn_id);
    {
        let mut room = state.room().await;
        let mut changed = team_service::connection_dropped(&mut room, conn_id).is_some();
        changed |= host_service::host_disconnected(&mut room, conn_id);
        if changed {
            publish(&state, &room);
        }
    }
    info!(conn = %conn_id, "observer disconnected");

    drop(outbound_tx);
    let _ = writer_task.await;
}

/// Team bound to a connection, if any.
fn bound_team(state: &SharedState, conn: ConnId) -> Option<String> {
    state
        .connections()
        .get(&conn)
        .and_then(|entry| entry.team_id.clone())
}

fn bind_team(state: &SharedState, conn: ConnId, team_id: Option<String>) {
    if let Some(mut entry) = state.connections().get_mut(&conn) {
        entry.team_id = team_id;
    }
}

/// Revoke a superseded connection: unbind its team and tell it why.
fn revoke_connection(state: &SharedState, conn: ConnId) {
    let Some(tx) = state.connections().get_mut(&conn).map(|mut entry| {
        entry.team_id = None;
        entry.tx.clone()
    }) else {
        return;
    };
    send_message(&tx, &ServerMessage::SessionRevoked);
}

async fn dispatch(
    state: &SharedState,
    conn: ConnId,
    client_id: &str,
    envelope: CommandEnvelope,
) -> Ack {
    let seq = envelope.seq;
    match handle_command(state, conn, client_id, envelope.command).await {
        Ok(outcome) => match outcome.data {
            Some(data) => Ack::with_data(seq, data),
            None => Ack::ok(seq),
        }
        .warned(outcome.warn),
        Err(err) => Ack::err(seq, err.to_string()),
    }
}

/// Successful command result: an optional data payload plus a soft warning.
#[derive(Debug, Default)]
struct Outcome {
    data: Option<serde_json::Value>,
    warn: Option<String>,
}

impl Outcome {
    fn empty() -> Self {
        Self::default()
    }

    fn data(value: serde_json::Value) -> Self {
        Self {
            data: Some(value),
            warn: None,
        }
    }
}

async fn handle_command(
    state: &SharedState,
    conn: ConnId,
    client_id: &str,
    command: ClientCommand,
) -> Result<Outcome, ServiceError> {
    let now = now_ms();
    match command {
        ClientCommand::Register(payload) => {
            payload.validate()?;
            let mut room = state.room().await;
            let session =
                team_service::register(&mut room, conn, &payload.name, payload.credits)?;
            bind_team(state, conn, Some(session.team_id.clone()));
            publish(state, &room);
            Ok(Outcome::data(
                json!({ "teamId": session.team_id, "key": session.key }),
            ))
        }
        ClientCommand::Resume { team_id, key } => {
            let mut room = state.room().await;
            let session = team_service::resume(&mut room, conn, &team_id, &key)?;
            if let Some(prev) = session.revoked_conn {
                revoke_connection(state, prev);
            }
            bind_team(state, conn, Some(session.team_id.clone()));
            publish(state, &room);
            Ok(Outcome::data(
                json!({ "teamId": session.team_id, "key": session.key }),
            ))
        }
        ClientCommand::HostToggle { pin } => {
            let mut room = state.room().await;
            let connections = state.connections();
            let grant = host_service::toggle_host(
                &mut room,
                conn,
                client_id,
                pin.as_deref(),
                state.config().host_pin.as_deref(),
                |id| connections.contains_key(&id),
                now,
            )?;
            publish(state, &room);
            Ok(Outcome::data(
                json!({ "host": grant.host, "hostToken": grant.token }),
            ))
        }
        ClientCommand::HostReclaim { token } => {
            let mut room = state.room().await;
            let connections = state.connections();
            let grant = host_service::reclaim_host(&mut room, conn, client_id, &token, |id| {
                connections.contains_key(&id)
            })?;
            publish(state, &room);
            Ok(Outcome::data(
                json!({ "host": grant.host, "hostToken": grant.token }),
            ))
        }
        ClientCommand::SetFilterName { q } => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            host_service::set_filter_name(&mut room, &q)?;
            publish(state, &room);
            Ok(Outcome::empty())
        }
        ClientCommand::SetRoleFilter { role } => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            host_service::set_role_filter(&mut room, &role)?;
            publish(state, &room);
            Ok(Outcome::empty())
        }
        ClientCommand::RandomStart => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            let letter = host_service::random_start(&mut room, now)?;
            publish(state, &room);
            Ok(Outcome::data(
                json!({ "letter": letter.map(String::from) }),
            ))
        }
        ClientCommand::ToggleRoll => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            let rolling = host_service::toggle_roll(&mut room, now)?;
            publish(state, &room);
            Ok(Outcome::data(json!({ "rolling": rolling })))
        }
        ClientCommand::StopRoll => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            host_service::stop_roll(&mut room);
            publish(state, &room);
            Ok(Outcome::empty())
        }
        ClientCommand::SetRollMs { ms } => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            let applied = host_service::set_roll_ms(&mut room, ms);
            publish(state, &room);
            Ok(Outcome::data(json!({ "rollMs": applied })))
        }
        ClientCommand::Skip => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            host_service::skip(&mut room, now)?;
            publish(state, &room);
            Ok(Outcome::empty())
        }
        ClientCommand::BackN { n } => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            host_service::back_n(&mut room, n)?;
            publish(state, &room);
            Ok(Outcome::empty())
        }
        ClientCommand::PinIndex { index } => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            host_service::pin_index(&mut room, index)?;
            publish(state, &room);
            Ok(Outcome::empty())
        }
        ClientCommand::BidIncrement { amount } => {
            bid(state, conn, BidKind::Increment(amount), now).await
        }
        ClientCommand::BidFree { value } => bid(state, conn, BidKind::Free(value), now).await,
        ClientCommand::FinalizeSale => {
            let mut room = state.room().await;
            // Accepted from the host or from the winning team's own connection.
            let is_host = host_service::ensure_host(&room, conn).is_ok();
            let is_winner = bound_team(state, conn)
                .is_some_and(|team| room.leader.as_deref() == Some(team.as_str()));
            if !is_host && !is_winner {
                return Err(ServiceError::Unauthorized(
                    "only the host or the winning team may finalize".into(),
                ));
            }
            match sale_service::finalize_pending_sale(&mut room, AssignSource::Finalize, now) {
                Ok(sale) => {
                    emit_sold(state, &sale.event);
                    publish(state, &room);
                    state.request_backup();
                    Ok(Outcome {
                        data: Some(json!({ "saleId": sale.event.sale_id })),
                        warn: sale.warn,
                    })
                }
                Err(err) if err.is_noop() => Ok(Outcome::empty()),
                Err(err) => {
                    sale_service::record_assign_error(
                        &mut room,
                        &err,
                        AssignSource::Finalize,
                        now,
                    );
                    publish(state, &room);
                    Err(ServiceError::InvalidState(err.to_string()))
                }
            }
        }
        ClientCommand::AssignPlayer {
            player_id,
            team_id,
            price,
        } => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            let sale = sale_service::manual_assign(&mut room, &player_id, &team_id, price, now)?;
            emit_sold(state, &sale.event);
            publish(state, &room);
            state.request_backup();
            Ok(Outcome {
                data: Some(json!({ "saleId": sale.event.sale_id })),
                warn: sale.warn,
            })
        }
        ClientCommand::UndoSale { sale_id } => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            sale_service::undo_sale(&mut room, &sale_id, now)?;
            publish(state, &room);
            state.request_backup();
            Ok(Outcome::empty())
        }
        ClientCommand::Kick { team_id } => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            let kicked_conn = host_service::kick(&mut room, &team_id, now)?;
            if let Some(kicked) = kicked_conn {
                if let Some(tx) = state
                    .connections()
                    .get_mut(&kicked)
                    .map(|mut entry| {
                        entry.team_id = None;
                        entry.tx.clone()
                    })
                {
                    send_message(
                        &tx,
                        &ServerMessage::Kicked {
                            reason: "removed by the host".into(),
                        },
                    );
                }
            }
            publish(state, &room);
            Ok(Outcome::empty())
        }
        ClientCommand::Leave => {
            let mut room = state.room().await;
            team_service::leave(&mut room, conn)?;
            bind_team(state, conn, None);
            publish(state, &room);
            Ok(Outcome::empty())
        }
        ClientCommand::UpdateProfile(payload) => {
            payload.validate()?;
            let team_id = bound_team(state, conn).ok_or_else(|| {
                ServiceError::InvalidState("no team bound to this connection".into())
            })?;
            let mut room = state.room().await;
            team_service::update_profile(
                &mut room,
                &team_id,
                payload.name.as_deref(),
                payload.credits,
            )?;
            publish(state, &room);
            Ok(Outcome::empty())
        }
        ClientCommand::Reset => {
            let mut room = state.room().await;
            host_service::ensure_host(&room, conn)?;
            host_service::full_reset(&mut room, now)?;
            for mut entry in state.connections().iter_mut() {
                entry.team_id = None;
            }
            publish(state, &room);
            state.request_backup();
            Ok(Outcome::empty())
        }
        ClientCommand::Unknown => Err(ServiceError::InvalidInput("unknown command".into())),
    }
}

async fn bid(
    state: &SharedState,
    conn: ConnId,
    kind: BidKind,
    now: i64,
) -> Result<Outcome, ServiceError> {
    let team_id = bound_team(state, conn)
        .ok_or_else(|| ServiceError::InvalidState("register a team before bidding".into()))?;
    let mut room = state.room().await;
    let ack = place_bid(&mut room, &team_id, kind, now)?;
    if ack.accepted {
        publish(state, &room);
    }
    Ok(Outcome {
        data: Some(json!({ "accepted": ack.accepted, "topBid": ack.top_bid })),
        warn: ack.warn,
    })
}
