//! Tick task: the fixed-interval synchronization loop.
//!
//! DESIGN
//! ======
//! One background task drives every resident room and capture session. Per
//! room: lock, drain and apply the queue, take the diff, unlock, then push
//! the diff with `try_send`. Rooms that ended the tick idle are persisted
//! and evicted after all rooms were ticked.
//!
//! Eviction saves a snapshot outside every lock. The room is dropped only
//! if it is still idle and its revision did not move during the save; a
//! join or enqueue in that window keeps it resident.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here propagates. Serialization and store failures are logged
//! and the affected room stays resident for the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::frame::{Data, Frame, to_data};
use crate::protocol::push;
use crate::scene::room::RoomId;
use crate::scene::session::SessionId;
use crate::services::fanout;
use crate::state::{AppState, SharedRoom, SharedSession};

/// Start the background tick loop.
pub fn spawn_tick_task(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_millis(state.config.tick_interval_ms);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = state.config.tick_interval_ms, "tick task started");
        loop {
            interval.tick().await;
            run_tick(&state).await;
        }
    })
}

/// One pass over every room and session.
pub async fn run_tick(state: &AppState) {
    let idle = tick_rooms(state).await;
    for room_id in idle {
        evict_room(state, room_id).await;
    }
    tick_sessions(state).await;
}

// =============================================================================
// ROOMS
// =============================================================================

async fn tick_rooms(state: &AppState) -> Vec<RoomId> {
    let rooms: Vec<(RoomId, SharedRoom)> = state
        .rooms
        .read()
        .await
        .iter()
        .map(|(id, room)| (*id, room.clone()))
        .collect();

    let mut idle = Vec::new();
    for (room_id, room) in rooms {
        let (tick, is_idle) = {
            let mut room = room.lock().await;
            let tick = room.tick();
            (tick, room.is_idle())
        };

        if tick.update.has_entity_changes() {
            debug!(room_id, recipients = tick.recipients.len(), "room diff has entity changes");
        }
        if !tick.recipients.is_empty() {
            match to_data(&tick.update) {
                Ok(data) => fanout::deliver(state, &tick.recipients, &Frame::push(push::SESSION_UPDATE, data)).await,
                Err(e) => error!(room_id, error = %e, "room update serialization failed"),
            }
        }
        if is_idle {
            idle.push(room_id);
        }
    }
    idle
}

/// Persist an idle room and drop it from memory. Returns whether it was
/// evicted.
pub async fn evict_room(state: &AppState, room_id: RoomId) -> bool {
    let Some(room) = state.rooms.read().await.get(&room_id).cloned() else {
        return false;
    };

    let (snapshot, revision) = {
        let room = room.lock().await;
        if !room.is_idle() {
            return false;
        }
        (room.snapshot(), room.revision())
    };

    if let Err(e) = state.store.save_room(&snapshot).await {
        error!(room_id, error = %e, "room save failed; keeping room resident");
        return false;
    }

    let mut rooms = state.rooms.write().await;
    let unchanged = {
        let guard = room.lock().await;
        guard.is_idle() && guard.revision() == revision
    };
    if !unchanged {
        debug!(room_id, "room changed during save; eviction skipped");
        return false;
    }
    if !rooms.get(&room_id).is_some_and(|resident| Arc::ptr_eq(resident, &room)) {
        return false;
    }
    rooms.remove(&room_id);
    info!(room_id, "room persisted and evicted");
    true
}

// =============================================================================
// CAPTURE SESSIONS
// =============================================================================

async fn tick_sessions(state: &AppState) {
    let sessions: Vec<(SessionId, SharedSession)> = state
        .sessions
        .read()
        .await
        .iter()
        .map(|(id, session)| (*id, session.clone()))
        .collect();

    for (session_id, session) in sessions {
        let tick = session.lock().await.tick();
        let Some(tick) = tick else {
            drop_session(state, session_id).await;
            continue;
        };

        let mut batch = Vec::with_capacity(tick.viewers.len() * 2 + 1);
        let (host, host_update) = tick.host;
        match to_data(&host_update) {
            Ok(data) => batch.push((host, Frame::push(push::CAPTURE_UPDATE, data))),
            Err(e) => error!(session_id, error = %e, "host update serialization failed"),
        }
        for (viewer, update) in tick.viewers {
            match to_data(&update) {
                Ok(data) => batch.push((viewer, Frame::push(push::CAPTURE_UPDATE, data))),
                Err(e) => error!(session_id, error = %e, "viewer update serialization failed"),
            }
            if tick.closed {
                let closed = Frame::push(push::CAPTURE_CLOSED, Data::new()).with_data("session_id", session_id);
                batch.push((viewer, closed));
            }
        }
        fanout::deliver_each(state, batch).await;

        if tick.closed {
            drop_session(state, session_id).await;
        }
    }
}

async fn drop_session(state: &AppState, session_id: SessionId) {
    state.capture_members.write().await.retain(|_, seat| seat.session_id != session_id);
    state.sessions.write().await.remove(&session_id);
    info!(session_id, "capture session closed");
}

#[cfg(test)]
#[path = "tick_test.rs"]
mod tests;
