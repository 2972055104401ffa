//! Editing service: registration, room membership and mutation requests.
//!
//! DESIGN
//! ======
//! Handlers here only validate preconditions and enqueue actions; the tick
//! task is the sole writer of entity state. Membership is derived from the
//! connection's registry entry, never from ids carried in the payload.
//!
//! Rooms are loaded from the store on first join. The load happens outside
//! every lock; the room is then inserted and the joining user attached while
//! the room table is write-locked, so a concurrent eviction can never drop a
//! room that has just gained a member.
//!
//! ERROR HANDLING
//! ==============
//! Precondition failures are returned to the caller as `RoomError`.
//! Failures inside a queued action are invisible here; they are logged as
//! no-ops when the tick applies them.

use std::sync::Arc;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::frame::{Data, ErrorCode, Frame};
use crate::protocol::{BatchUpdateBody, push};
use crate::scene::action::{EntityPayload, RoomAction};
use crate::scene::entity::{EntityAction, Marker};
use crate::scene::room::{Room, RoomId, RoomMeta, RoomObjects};
use crate::scene::user::{ConnectionId, User, UserId, UserProfile};
use crate::services::fanout;
use crate::services::store::StoreError;
use crate::state::{AppState, EditingUser, RoomVisit, SharedRoom};

/// Load-then-attach retries when a room is evicted between the two steps.
const JOIN_ATTEMPTS: usize = 3;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room not found: {0}")]
    NotFound(RoomId),
    #[error("connection is already registered")]
    AlreadyRegistered,
    #[error("connection is not registered")]
    NotRegistered,
    #[error("user is not a member of the target room")]
    NotMember,
    #[error("base scene has no registered version: {0}")]
    BaseSceneNotFound(String),
    #[error("no free room id after {0} attempts")]
    NoFreeRoomId(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::AlreadyRegistered => "E_ALREADY_REGISTERED",
            Self::NotRegistered => "E_NOT_REGISTERED",
            Self::NotMember => "E_NOT_MEMBER",
            Self::BaseSceneNotFound(_) => "E_PRECONDITION_FAILED",
            Self::NoFreeRoomId(_) => "E_ROOM_ID_EXHAUSTED",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::NoFreeRoomId(_) => true,
            Self::Store(e) => e.retryable(),
            _ => false,
        }
    }
}

// =============================================================================
// REGISTRATION
// =============================================================================

/// Register the connection as an editing user.
///
/// # Errors
///
/// `AlreadyRegistered` if the connection registered before; the existing
/// registration is left untouched.
pub async fn register_user(state: &AppState, connection: ConnectionId, profile: UserProfile) -> Result<UserId, RoomError> {
    let mut users = state.users.write().await;
    if users.contains_key(&connection) {
        return Err(RoomError::AlreadyRegistered);
    }
    let id = state.next_user_id();
    info!(%connection, user_id = id, username = %profile.username, "editing user registered");
    users.insert(connection, EditingUser { id, profile, room: None });
    Ok(id)
}

/// Connection closed: forget the user and queue its departure from its room.
pub async fn disconnect(state: &AppState, connection: ConnectionId) {
    let Some(user) = state.users.write().await.remove(&connection) else {
        return;
    };
    if let Some(visit) = user.room {
        enqueue_removal(state, visit, user.id).await;
    }
    info!(%connection, user_id = user.id, room_id = ?user.room.map(|v| v.room_id), "editing user disconnected");
}

// =============================================================================
// ROOM LIFECYCLE
// =============================================================================

/// Metadata of every persisted room.
///
/// # Errors
///
/// Returns a store error if the listing fails.
pub async fn fetch_previews(state: &AppState) -> Result<Vec<RoomMeta>, RoomError> {
    Ok(state.store.list_previews().await?)
}

/// Create and persist a room holding only the base scene, then tell every
/// registered user that the room list changed.
///
/// # Errors
///
/// `BaseSceneNotFound` if the base scene has no registered version,
/// `NoFreeRoomId` if every draw collided, or a store error.
pub async fn create_empty_room(
    state: &AppState,
    name: &str,
    base_scene_id: &str,
    authors: &str,
) -> Result<RoomId, RoomError> {
    if !state.store.base_scene_exists(base_scene_id).await? {
        return Err(RoomError::BaseSceneNotFound(base_scene_id.to_owned()));
    }

    let room_id = {
        let _creating = state.room_creation.lock().await;
        let room_id = allocate_room_id(state).await?;
        let room = Room::with_base_scene(room_id, name, base_scene_id, authors);
        state.store.save_room(&room.snapshot()).await?;
        room_id
    };
    info!(room_id, name, base_scene_id, "room created");

    fanout::broadcast_registered(state, &Frame::push(push::ROOM_PREVIEWS_CHANGED, Data::new())).await;
    Ok(room_id)
}

async fn allocate_room_id(state: &AppState) -> Result<RoomId, RoomError> {
    let attempts = state.config.room_id_attempts;
    for _ in 0..attempts {
        let candidate = rand::rng().random_range(1..=state.config.max_room_id);
        if state.rooms.read().await.contains_key(&candidate) {
            continue;
        }
        if !state.store.room_exists(candidate).await? {
            return Ok(candidate);
        }
    }
    warn!(attempts, max_room_id = state.config.max_room_id, "room id space exhausted");
    Err(RoomError::NoFreeRoomId(attempts))
}

/// Join a room, loading it from the store if it is not resident. Leaves the
/// previous room first.
///
/// # Errors
///
/// `NotRegistered` for unknown connections, `NotFound` if the room exists
/// neither in memory nor in the store, or a store error.
pub async fn join_room(state: &AppState, connection: ConnectionId, room_id: RoomId) -> Result<(), RoomError> {
    let (user_id, profile, previous) = {
        let users = state.users.read().await;
        let user = users.get(&connection).ok_or(RoomError::NotRegistered)?;
        (user.id, user.profile.clone(), user.room)
    };

    if let Some(visit) = previous {
        enqueue_removal(state, visit, user_id).await;
    }

    let membership = state.next_membership();
    let visit = RoomVisit { room_id, membership };
    if let Err(e) = attach(state, room_id, User::new(user_id, &profile, connection, membership)).await {
        if let Some(user) = state.users.write().await.get_mut(&connection) {
            user.room = None;
        }
        return Err(e);
    }

    let mut users = state.users.write().await;
    let Some(user) = users.get_mut(&connection) else {
        // Disconnected while joining; undo the attach.
        drop(users);
        enqueue_removal(state, visit, user_id).await;
        return Err(RoomError::NotRegistered);
    };
    user.room = Some(visit);
    info!(%connection, user_id, room_id, "user joined room");
    Ok(())
}

async fn attach(state: &AppState, room_id: RoomId, member: User) -> Result<(), RoomError> {
    for _ in 0..JOIN_ATTEMPTS {
        let resident = state.rooms.read().await.contains_key(&room_id);
        let loaded = if resident {
            None
        } else {
            let snapshot = state.store.load_room(room_id).await?;
            Some(snapshot.ok_or(RoomError::NotFound(room_id))?)
        };

        let mut rooms = state.rooms.write().await;
        let existing = rooms.get(&room_id).cloned();
        let shared = match (existing, loaded) {
            (Some(shared), _) => shared,
            (None, Some(snapshot)) => {
                let shared = Arc::new(Mutex::new(Room::from_snapshot(snapshot)));
                rooms.insert(room_id, shared.clone());
                info!(room_id, "room loaded from store");
                shared
            }
            // Evicted between the residency check and the write lock.
            (None, None) => continue,
        };
        shared.lock().await.add_user(member);
        return Ok(());
    }
    Err(RoomError::NotFound(room_id))
}

/// Leave the current room. Succeeds when the user is in no room.
///
/// # Errors
///
/// `NotRegistered` for unknown connections.
pub async fn exit_room(state: &AppState, connection: ConnectionId) -> Result<(), RoomError> {
    let (user_id, visit) = {
        let mut users = state.users.write().await;
        let user = users.get_mut(&connection).ok_or(RoomError::NotRegistered)?;
        (user.id, user.room.take())
    };
    if let Some(visit) = visit {
        enqueue_removal(state, visit, user_id).await;
        info!(%connection, user_id, room_id = visit.room_id, "user left room");
    }
    Ok(())
}

async fn enqueue_removal(state: &AppState, visit: RoomVisit, user_id: UserId) {
    let Some(room) = state.rooms.read().await.get(&visit.room_id).cloned() else {
        return;
    };
    room.lock()
        .await
        .enqueue(RoomAction::RemoveUser { user_id, membership: visit.membership });
}

// =============================================================================
// QUERIES
// =============================================================================

/// Full current state of the caller's room.
///
/// # Errors
///
/// `NotRegistered`, `NotMember` when the caller is in no room, or
/// `NotFound` if the room vanished.
pub async fn fetch_room_objects(state: &AppState, connection: ConnectionId) -> Result<RoomObjects, RoomError> {
    let (_, room) = current_room(state, connection).await?;
    let room = room.lock().await;
    Ok(room.objects())
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Queue creation of one entity in the caller's room.
///
/// # Errors
///
/// Membership errors as for [`fetch_room_objects`].
pub async fn create_entity(state: &AppState, connection: ConnectionId, payload: EntityPayload) -> Result<(), RoomError> {
    submit(state, connection, |_| vec![RoomAction::Create(payload)]).await
}

/// Queue an update/create/delete of one entity in the caller's room.
///
/// # Errors
///
/// Membership errors as for [`fetch_room_objects`].
pub async fn modify_entity(
    state: &AppState,
    connection: ConnectionId,
    action: EntityAction,
    payload: EntityPayload,
) -> Result<(), RoomError> {
    submit(state, connection, |_| vec![RoomAction::Modify { action, payload }]).await
}

/// Queue a batch of model transforms, marker changes and the sender's own
/// transform, in that order.
///
/// # Errors
///
/// Membership errors as for [`fetch_room_objects`].
pub async fn batch_update(state: &AppState, connection: ConnectionId, body: BatchUpdateBody) -> Result<(), RoomError> {
    submit(state, connection, |user_id| {
        let mut actions = Vec::with_capacity(body.marker_states.len() + 2);
        if !body.model_states.is_empty() {
            actions.push(RoomAction::BatchUpdate(body.model_states));
        }
        for change in body.marker_states {
            actions.push(RoomAction::Modify { action: change.action, payload: EntityPayload::Marker(change.marker_info) });
        }
        if let (Some(position), Some(rotation)) = (body.user_position, body.user_rotation) {
            actions.push(RoomAction::UpdateUserTransform { user_id, position, rotation });
        }
        actions
    })
    .await
}

/// Queue a marker change for an explicitly named room.
///
/// # Errors
///
/// `NotFound` if the room is not resident, `NotMember` if the caller is
/// not in it.
pub async fn update_marker_in(
    state: &AppState,
    connection: ConnectionId,
    room_id: RoomId,
    action: EntityAction,
    marker: Marker,
) -> Result<(), RoomError> {
    let user_id = state
        .users
        .read()
        .await
        .get(&connection)
        .map(|u| u.id)
        .ok_or(RoomError::NotRegistered)?;
    let room = state
        .rooms
        .read()
        .await
        .get(&room_id)
        .cloned()
        .ok_or(RoomError::NotFound(room_id))?;

    let mut room = room.lock().await;
    if !room.is_member(user_id) {
        return Err(RoomError::NotMember);
    }
    room.enqueue(RoomAction::Modify { action, payload: EntityPayload::Marker(marker) });
    Ok(())
}

async fn submit(
    state: &AppState,
    connection: ConnectionId,
    build: impl FnOnce(UserId) -> Vec<RoomAction>,
) -> Result<(), RoomError> {
    let (user_id, room) = current_room(state, connection).await?;
    let actions = build(user_id);
    let mut room = room.lock().await;
    for action in actions {
        room.enqueue(action);
    }
    Ok(())
}

async fn current_room(state: &AppState, connection: ConnectionId) -> Result<(UserId, SharedRoom), RoomError> {
    let (user_id, visit) = {
        let users = state.users.read().await;
        let user = users.get(&connection).ok_or(RoomError::NotRegistered)?;
        (user.id, user.room.ok_or(RoomError::NotMember)?)
    };
    let room = state
        .rooms
        .read()
        .await
        .get(&visit.room_id)
        .cloned()
        .ok_or(RoomError::NotFound(visit.room_id))?;
    Ok((user_id, room))
}

// =============================================================================
// RECONSTRUCTION CALLBACK
// =============================================================================

/// Record a freshly finished reconstruction and push `new_id` to every
/// member of every resident room. Returns the number of recipients.
///
/// # Errors
///
/// Returns a store error if the version cannot be recorded.
pub async fn notify_new_reconstruction(state: &AppState, model_id: &str, version: &str) -> Result<usize, RoomError> {
    state.store.register_model_version(model_id, version).await?;

    let rooms: Vec<SharedRoom> = state.rooms.read().await.values().cloned().collect();
    let mut targets = Vec::new();
    for room in rooms {
        targets.extend(room.lock().await.member_connections());
    }

    let frame = Frame::push(push::NEW_RECONSTRUCTION, Data::new()).with_data("new_id", model_id);
    fanout::deliver(state, &targets, &frame).await;
    info!(model_id, version, recipients = targets.len(), "new reconstruction announced");
    Ok(targets.len())
}

#[cfg(test)]
#[path = "editing_test.rs"]
mod tests;
