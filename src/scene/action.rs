//! Queued commands: the only path by which room and session state changes.
//!
//! DESIGN
//! ======
//! Request handlers validate membership and enqueue an action; the tick task
//! drains the queue and invokes each action in arrival order. Actions own
//! the data they need (payload snapshots taken at enqueue time) and address
//! users by id, never by reference.
//!
//! ERROR HANDLING
//! ==============
//! Invocation never fails. A target that vanished between enqueue and
//! invocation turns the action into a logged no-op; the next diff is the
//! convergence mechanism.

use tracing::debug;

use super::entity::{
    Annotation, EntityAction, EntityId, Marker, Measurement, ModelTransformUpdate, PlacedModel, Vec3,
};
use super::room::Room;
use super::session::{CaptureSession, Notification};
use super::user::UserId;

// =============================================================================
// PAYLOADS
// =============================================================================

/// Payload for one entity of any kind.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityPayload {
    Model(PlacedModel),
    Marker(Marker),
    Annotation(Annotation),
    Measurement(Measurement),
}

// =============================================================================
// ROOM ACTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RoomAction {
    /// Create one entity; its id is assigned at invocation.
    Create(EntityPayload),
    /// Apply transform diffs to placed models.
    BatchUpdate(Vec<ModelTransformUpdate>),
    /// Create, update or delete one entity.
    Modify { action: EntityAction, payload: EntityPayload },
    UpdateUserTransform { user_id: UserId, position: Vec3, rotation: Vec3 },
    /// Mark a user departed if it is still on the visit `membership`.
    RemoveUser { user_id: UserId, membership: u64 },
}

impl RoomAction {
    pub fn invoke(self, room: &mut Room) {
        match self {
            Self::Create(payload) => {
                let (kind, id) = modify(room, EntityAction::Create, payload);
                debug!(room_id = room.meta.room_id, kind, ?id, "entity created");
            }
            Self::BatchUpdate(updates) => {
                for update in updates {
                    if !room.models.update(update.id, |model| update.apply_to(model)) {
                        continue;
                    }
                    if update.mark_delete {
                        room.models.mark_deleted(update.id);
                        debug!(room_id = room.meta.room_id, id = update.id, "model deleted");
                    }
                }
            }
            Self::Modify { action, payload } => {
                let (kind, id) = modify(room, action, payload);
                if id.is_none() {
                    debug!(room_id = room.meta.room_id, kind, ?action, "entity action had no effect");
                }
            }
            Self::UpdateUserTransform { user_id, position, rotation } => {
                match room.users.get_mut(&user_id) {
                    Some(user) if !user.deleted => {
                        user.position = position;
                        user.rotation = rotation;
                    }
                    _ => debug!(room_id = room.meta.room_id, user_id, "transform for absent user dropped"),
                }
            }
            Self::RemoveUser { user_id, membership } => match room.users.get_mut(&user_id) {
                Some(user) if user.membership == membership => user.deleted = true,
                _ => debug!(room_id = room.meta.room_id, user_id, membership, "stale user removal ignored"),
            },
        }
    }
}

fn modify(room: &mut Room, action: EntityAction, payload: EntityPayload) -> (&'static str, Option<EntityId>) {
    match payload {
        EntityPayload::Model(model) => ("model", room.models.apply(action, model)),
        EntityPayload::Marker(marker) => ("marker", room.markers.apply(action, marker)),
        EntityPayload::Annotation(annotation) => ("annotation", room.annotations.apply(action, annotation)),
        EntityPayload::Measurement(measurement) => ("measurement", room.measurements.apply(action, measurement)),
    }
}

// =============================================================================
// SESSION ACTIONS
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    UpdateModelVersion { model_id: String, version: String },
    UserTransform { user_id: UserId, position: Vec3, rotation: Vec3 },
    Logout { user_id: UserId },
    Close,
    Marker { action: EntityAction, marker: Marker },
}

impl SessionAction {
    pub fn invoke(self, session: &mut CaptureSession) {
        match self {
            Self::UpdateModelVersion { model_id, version } => {
                session.model_id = model_id;
                session.version = version;
                session.raise(Notification::UpdatedModelVersion);
            }
            Self::UserTransform { user_id, position, rotation } => {
                let Some(user) = session.user_mut(user_id) else {
                    debug!(session_id = session.id, user_id, "transform for unknown session user dropped");
                    return;
                };
                user.position = position;
                user.rotation = rotation;
            }
            Self::Logout { user_id } => {
                let Some(viewer) = session.viewers.get_mut(&user_id) else {
                    return;
                };
                viewer.deleted = true;
                session.raise(Notification::DeletedUser);
            }
            Self::Close => session.raise(Notification::ClosedRoom),
            Self::Marker { action, marker } => {
                let applied = session.markers.apply(action, marker);
                if action == EntityAction::Create && applied.is_some() {
                    session.raise(Notification::CreatedMarker);
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "action_test.rs"]
mod tests;
