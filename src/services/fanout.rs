//! Best-effort frame delivery to live connections.
//!
//! Delivery never awaits a slow client: frames go through `try_send` on the
//! connection's bounded channel and are dropped when it is full or closed.
//! A missed push is repaired by the next tick's diff.

use tracing::warn;

use crate::frame::Frame;
use crate::scene::user::ConnectionId;
use crate::state::AppState;

/// Send `frame` to each listed connection that is still open.
pub async fn deliver(state: &AppState, targets: &[ConnectionId], frame: &Frame) {
    if targets.is_empty() {
        return;
    }
    let connections = state.connections.read().await;
    for connection in targets {
        let Some(tx) = connections.get(connection) else {
            continue;
        };
        if tx.try_send(frame.clone()).is_err() {
            warn!(%connection, code = frame.code, "dropped frame for slow or closed connection");
        }
    }
}

/// Send a distinct frame to each connection.
pub async fn deliver_each(state: &AppState, batch: Vec<(ConnectionId, Frame)>) {
    if batch.is_empty() {
        return;
    }
    let connections = state.connections.read().await;
    for (connection, frame) in batch {
        let Some(tx) = connections.get(&connection) else {
            continue;
        };
        let code = frame.code;
        if tx.try_send(frame).is_err() {
            warn!(%connection, code, "dropped frame for slow or closed connection");
        }
    }
}

/// Send `frame` to every registered editing user.
pub async fn broadcast_registered(state: &AppState, frame: &Frame) {
    let targets: Vec<ConnectionId> = state.users.read().await.keys().copied().collect();
    deliver(state, &targets, frame).await;
}

#[cfg(test)]
#[path = "fanout_test.rs"]
mod tests;
