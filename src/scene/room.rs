//! Editing room: authoritative state of one collaborative scene.
//!
//! DESIGN
//! ======
//! A room owns four entity stores, the users currently inside it and a FIFO
//! queue of pending actions. The room never reacts to a request directly:
//! `tick` drains the queue, applies every action in order, extracts the dirty
//! diff plus the full user roster, and runs the post-update pass that drops
//! deleted entities and departed users.
//!
//! The `revision` counter moves whenever anything is enqueued, joined or
//! applied. Eviction compares it before and after writing a snapshot so a
//! room touched during the write is never dropped.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::action::RoomAction;
use super::entity::{
    Annotation, AssetRef, EntityId, EntityStore, Lifecycle, Marker, Measurement, NO_PARENT, PlacedModel,
};
use super::user::{ConnectionId, User, UserId};
use crate::frame::now_ms;

/// Numeric room id, unique across resident and persisted rooms.
pub type RoomId = i64;

// =============================================================================
// TYPES
// =============================================================================

/// Room metadata. Doubles as the preview listed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMeta {
    pub room_id: RoomId,
    pub name: String,
    /// Free text; for rooms created from a scan, the base scene id.
    pub description: String,
    pub authors: String,
    pub created_at_ms: i64,
    pub modified_at_ms: i64,
}

/// Per-tick diff pushed to every member.
#[derive(Debug, Clone, Serialize)]
pub struct RoomUpdate {
    pub room_id: RoomId,
    pub model_updates: Vec<PlacedModel>,
    pub marker_updates: Vec<Marker>,
    pub annotation_updates: Vec<Annotation>,
    pub measurement_updates: Vec<Measurement>,
    /// Full roster, not a diff.
    pub user_updates: Vec<User>,
}

impl RoomUpdate {
    /// Whether any entity changed during the tick.
    #[must_use]
    pub fn has_entity_changes(&self) -> bool {
        !(self.model_updates.is_empty()
            && self.marker_updates.is_empty()
            && self.annotation_updates.is_empty()
            && self.measurement_updates.is_empty())
    }
}

/// Full current state, answered to fetch requests.
#[derive(Debug, Clone, Serialize)]
pub struct RoomObjects {
    pub user_instances: Vec<User>,
    pub model_instances: Vec<PlacedModel>,
    pub marker_instances: Vec<Marker>,
    pub annotation_instances: Vec<Annotation>,
    pub measurement_instances: Vec<Measurement>,
}

/// Persisted document: metadata, every entity, and every creation counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    #[serde(flatten)]
    pub meta: RoomMeta,
    #[serde(default)]
    pub models: Vec<PlacedModel>,
    #[serde(default)]
    pub model_count: EntityId,
    #[serde(default)]
    pub markers: Vec<Marker>,
    #[serde(default)]
    pub marker_count: EntityId,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub annotation_count: EntityId,
    #[serde(default)]
    pub measurements: Vec<Measurement>,
    #[serde(default)]
    pub measurement_count: EntityId,
}

/// What one tick produced: the diff and whom to send it to.
#[derive(Debug, Clone)]
pub struct RoomTick {
    pub update: RoomUpdate,
    pub recipients: Vec<ConnectionId>,
}

// =============================================================================
// ROOM
// =============================================================================

#[derive(Debug)]
pub struct Room {
    pub meta: RoomMeta,
    pub(crate) models: EntityStore<PlacedModel>,
    pub(crate) markers: EntityStore<Marker>,
    pub(crate) annotations: EntityStore<Annotation>,
    pub(crate) measurements: EntityStore<Measurement>,
    pub(crate) users: BTreeMap<UserId, User>,
    pending: Vec<RoomAction>,
    revision: u64,
}

impl Room {
    #[must_use]
    pub fn new(meta: RoomMeta) -> Self {
        Self {
            meta,
            models: EntityStore::new(),
            markers: EntityStore::new(),
            annotations: EntityStore::new(),
            measurements: EntityStore::new(),
            users: BTreeMap::new(),
            pending: Vec::new(),
            revision: 0,
        }
    }

    /// New room whose only content is the base scan as model id 1.
    #[must_use]
    pub fn with_base_scene(room_id: RoomId, name: &str, base_scene_id: &str, authors: &str) -> Self {
        let now = now_ms();
        let mut room = Self::new(RoomMeta {
            room_id,
            name: name.to_owned(),
            description: base_scene_id.to_owned(),
            authors: authors.to_owned(),
            created_at_ms: now,
            modified_at_ms: now,
        });
        room.models.create(PlacedModel {
            id: 0,
            model_id: AssetRef::live(base_scene_id),
            parent_id: NO_PARENT,
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
            editable: false,
            lifecycle: Lifecycle::default(),
        });
        room
    }

    #[must_use]
    pub fn from_snapshot(snapshot: RoomSnapshot) -> Self {
        let mut room = Self::new(snapshot.meta);
        room.models = EntityStore::from_parts(snapshot.models, snapshot.model_count);
        room.markers = EntityStore::from_parts(snapshot.markers, snapshot.marker_count);
        room.annotations = EntityStore::from_parts(snapshot.annotations, snapshot.annotation_count);
        room.measurements = EntityStore::from_parts(snapshot.measurements, snapshot.measurement_count);
        room
    }

    /// Document for the external store, stamped with the current time.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        let mut meta = self.meta.clone();
        meta.modified_at_ms = now_ms();
        RoomSnapshot {
            meta,
            models: self.models.all(),
            model_count: self.models.creation_count(),
            markers: self.markers.all(),
            marker_count: self.markers.creation_count(),
            annotations: self.annotations.all(),
            annotation_count: self.annotations.creation_count(),
            measurements: self.measurements.all(),
            measurement_count: self.measurements.creation_count(),
        }
    }

    // -------------------------------------------------------------------------
    // membership
    // -------------------------------------------------------------------------

    /// Place a user in the room, replacing any earlier visit of the same id.
    pub fn add_user(&mut self, user: User) {
        self.users.insert(user.id, user);
        self.revision += 1;
    }

    /// Whether `user_id` is currently inside and not departing.
    #[must_use]
    pub fn is_member(&self, user_id: UserId) -> bool {
        self.users.get(&user_id).is_some_and(|u| !u.deleted)
    }

    /// Connections of every present member.
    #[must_use]
    pub fn member_connections(&self) -> Vec<ConnectionId> {
        self.users.values().filter(|u| !u.deleted).map(|u| u.connection).collect()
    }

    // -------------------------------------------------------------------------
    // queue + tick
    // -------------------------------------------------------------------------

    pub fn enqueue(&mut self, action: RoomAction) {
        self.pending.push(action);
        self.revision += 1;
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drain and apply queued actions, extract the diff, then run the
    /// post-update pass.
    pub fn tick(&mut self) -> RoomTick {
        let drained = std::mem::take(&mut self.pending);
        if !drained.is_empty() {
            self.revision += 1;
        }
        for action in drained {
            action.invoke(self);
        }

        let update = RoomUpdate {
            room_id: self.meta.room_id,
            model_updates: self.models.take_dirty(),
            marker_updates: self.markers.take_dirty(),
            annotation_updates: self.annotations.take_dirty(),
            measurement_updates: self.measurements.take_dirty(),
            user_updates: self.users.values().cloned().collect(),
        };
        let recipients = self.member_connections();

        self.post_update();
        RoomTick { update, recipients }
    }

    fn post_update(&mut self) {
        self.models.post_update();
        self.markers.post_update();
        self.annotations.post_update();
        self.measurements.post_update();
        self.users.retain(|_, user| !user.deleted);
    }

    /// No users and nothing queued: eligible for persistence and eviction.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.users.is_empty() && self.pending.is_empty()
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Everything currently in the room.
    #[must_use]
    pub fn objects(&self) -> RoomObjects {
        RoomObjects {
            user_instances: self.users.values().filter(|u| !u.deleted).cloned().collect(),
            model_instances: self.models.all(),
            marker_instances: self.markers.all(),
            annotation_instances: self.annotations.all(),
            measurement_instances: self.measurements.all(),
        }
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
