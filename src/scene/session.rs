//! Capture session: one host streaming a live reconstruction to viewers.
//!
//! DESIGN
//! ======
//! Same queue/tick shape as a room, reduced: markers are the only entity kind
//! and, instead of a per-entity diff for everything, actions raise coarse
//! notification events that the next tick reports and then clears. The
//! `ClosedRoom` event is sticky; once a tick has reported it the session
//! produces nothing further and the coordinator drops it.
//!
//! The host and viewers receive different payloads built from the same
//! state: the host sees every viewer, a viewer sees the host and the other
//! viewers, plus the model version whenever it changed.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::action::SessionAction;
use super::entity::{EntityStore, Marker};
use super::user::{ConnectionId, User, UserId};

/// Numeric capture session id.
pub type SessionId = i64;

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Coarse per-tick events. Wire values 1..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "u8")]
pub enum Notification {
    UpdatedModelVersion,
    ClosedRoom,
    CreatedMarker,
    DeletedUser,
}

impl From<Notification> for u8 {
    fn from(n: Notification) -> Self {
        match n {
            Notification::UpdatedModelVersion => 1,
            Notification::ClosedRoom => 2,
            Notification::CreatedMarker => 3,
            Notification::DeletedUser => 4,
        }
    }
}

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HostUpdate {
    pub session_id: SessionId,
    pub events: Vec<Notification>,
    pub host_info: User,
    pub viewer_infos: Vec<User>,
    pub marker_infos: Vec<Marker>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewerUpdate {
    pub session_id: SessionId,
    pub events: Vec<Notification>,
    pub host_info: User,
    pub viewer_infos: Vec<User>,
    pub marker_infos: Vec<Marker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Reply payload for a viewer that just joined.
#[derive(Debug, Clone, Serialize)]
pub struct SessionJoinInfo {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub model_id: String,
    pub version: String,
    pub host_info: User,
    pub marker_info: Vec<Marker>,
}

/// What one tick produced for each participant.
#[derive(Debug, Clone)]
pub struct SessionTick {
    pub host: (ConnectionId, HostUpdate),
    pub viewers: Vec<(ConnectionId, ViewerUpdate)>,
    /// The session closed this tick; viewers must be told and the session
    /// dropped.
    pub closed: bool,
}

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug)]
pub struct CaptureSession {
    pub id: SessionId,
    pub model_id: String,
    pub version: String,
    pub(crate) host: User,
    pub(crate) viewers: BTreeMap<UserId, User>,
    pub(crate) markers: EntityStore<Marker>,
    pending: Vec<SessionAction>,
    raised: BTreeSet<Notification>,
    closed: bool,
}

impl CaptureSession {
    #[must_use]
    pub fn new(id: SessionId, host: User, model_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id,
            model_id: model_id.into(),
            version: version.into(),
            host,
            viewers: BTreeMap::new(),
            markers: EntityStore::new(),
            pending: Vec::new(),
            raised: BTreeSet::new(),
            closed: false,
        }
    }

    pub(crate) fn raise(&mut self, notification: Notification) {
        if notification == Notification::ClosedRoom {
            self.closed = true;
        }
        self.raised.insert(notification);
    }

    pub(crate) fn user_mut(&mut self, user_id: UserId) -> Option<&mut User> {
        if self.host.id == user_id {
            return Some(&mut self.host);
        }
        self.viewers.get_mut(&user_id).filter(|v| !v.deleted)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[cfg(test)]
    pub fn is_viewer(&self, user_id: UserId) -> bool {
        self.viewers.get(&user_id).is_some_and(|v| !v.deleted)
    }

    #[must_use]
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Queue an action. Returns it back once the session has closed.
    ///
    /// # Errors
    ///
    /// Returns the rejected action when the session is closed.
    pub fn enqueue(&mut self, action: SessionAction) -> Result<(), SessionAction> {
        if self.closed {
            return Err(action);
        }
        self.pending.push(action);
        Ok(())
    }

    pub fn add_viewer(&mut self, viewer: User) {
        self.viewers.insert(viewer.id, viewer);
    }

    #[must_use]
    pub fn join_info(&self, user_id: UserId) -> SessionJoinInfo {
        SessionJoinInfo {
            session_id: self.id,
            user_id,
            model_id: self.model_id.clone(),
            version: self.version.clone(),
            host_info: self.host.clone(),
            marker_info: self.markers.all(),
        }
    }

    /// Connections of the host and every present viewer.
    #[cfg(test)]
    pub fn participant_connections(&self) -> Vec<ConnectionId> {
        std::iter::once(self.host.connection)
            .chain(self.viewers.values().filter(|v| !v.deleted).map(|v| v.connection))
            .collect()
    }

    /// Drain and apply queued actions and build per-participant payloads.
    ///
    /// Returns `None` once a previous tick already reported the close.
    pub fn tick(&mut self) -> Option<SessionTick> {
        if self.closed {
            return None;
        }

        for action in std::mem::take(&mut self.pending) {
            action.invoke(self);
        }

        let events: Vec<Notification> = self.raised.iter().copied().collect();
        let markers = self.markers.take_dirty();
        let viewers: Vec<User> = self.viewers.values().cloned().collect();
        let version_changed = self.raised.contains(&Notification::UpdatedModelVersion);

        let host = (
            self.host.connection,
            HostUpdate {
                session_id: self.id,
                events: events.clone(),
                host_info: self.host.clone(),
                viewer_infos: viewers.clone(),
                marker_infos: markers.clone(),
            },
        );

        let viewer_updates = viewers
            .iter()
            .filter(|v| !v.deleted)
            .map(|viewer| {
                let others = viewers.iter().filter(|o| o.id != viewer.id).cloned().collect();
                (
                    viewer.connection,
                    ViewerUpdate {
                        session_id: self.id,
                        events: events.clone(),
                        host_info: self.host.clone(),
                        viewer_infos: others,
                        marker_infos: markers.clone(),
                        model_id: version_changed.then(|| self.model_id.clone()),
                        version: version_changed.then(|| self.version.clone()),
                    },
                )
            })
            .collect();

        self.post_update();

        Some(SessionTick { host, viewers: viewer_updates, closed: self.closed })
    }

    fn post_update(&mut self) {
        self.markers.post_update();
        self.viewers.retain(|_, viewer| !viewer.deleted);
        self.raised.clear();
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
