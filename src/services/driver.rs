//! The room driver: the single background task that owns deadline-driven
//! transitions and the automatic catalog roll.
//!
//! All timer state (deadline, countdown seconds, roll tick) is advanced only
//! here, under the room lock, so command handlers never race the clock.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

use crate::{
    services::{
        broadcast::{emit_sold, publish},
        sale_service::{finalize_pending_sale, record_assign_error},
    },
    state::{SharedState, now_ms, phase::Phase, room::AssignSource},
};

/// Driver tick granularity. Deadlines are absolute timestamps, so the tick
/// only bounds reaction latency.
const TICK: Duration = Duration::from_millis(100);

/// Spawn the driver task for the room.
pub fn spawn(state: SharedState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            tick(&state).await;
        }
    })
}

async fn tick(state: &SharedState) {
    let mut room = state.room().await;
    let now = now_ms();
    let version_before = room.version;
    let mut backup = false;

    // Catalog roll.
    if room.rolling && room.phase == Phase::Rolling && !room.view_players.is_empty() {
        let ms = room.roll_ms.clamp(300, 5000);
        if now - room.roll_tick_at >= ms {
            room.roll_tick_at = now;
            room.current_index = (room.current_index + 1) % room.view_players.len();
            room.touch();
        }
    } else {
        room.roll_tick_at = now;
    }

    // Deadline-driven transitions.
    if room.deadline > 0 && now >= room.deadline {
        match room.phase {
            Phase::Armed => {
                room.transition(Phase::Countdown, now);
            }
            Phase::Countdown => {
                if room.countdown_sec > 1 {
                    room.countdown_sec -= 1;
                    room.deadline = now + crate::state::phase::COUNTDOWN_TICK_MS;
                    room.touch();
                } else if room.leader.is_some() {
                    room.mk_history_pending(now);
                    room.transition(Phase::Sold, now);
                    backup = true;
                    match finalize_pending_sale(&mut room, AssignSource::Auto, now) {
                        Ok(sale) => {
                            emit_sold(state, &sale.event);
                            if let Some(reason) = sale.warn {
                                warn!(%reason, "sale settled despite roster warning");
                            }
                        }
                        Err(err) if err.is_noop() => {}
                        Err(err) => {
                            warn!(error = %err, "automatic settlement failed");
                            record_assign_error(&mut room, &err, AssignSource::Auto, now);
                        }
                    }
                } else {
                    // Nobody bid before the countdown ran out.
                    room.transition(Phase::Rolling, now);
                }
            }
            _ => {}
        }
    }

    if room.version != version_before {
        publish(state, &room);
        if backup {
            state.request_backup();
        }
    }
}
