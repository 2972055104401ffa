//! Scene entities and the per-kind entity store.
//!
//! DESIGN
//! ======
//! Every scene object (placed model, marker, annotation, measurement) shares
//! the same lifecycle: an id assigned by the owning room from a per-kind
//! counter, a `dirty` flag set on every change and cleared when the entity
//! goes out in a diff, and a terminal `mark_delete` flag.
//!
//! Deletion is two-phase. A delete marks the entity and stages its id; the
//! next diff still carries it (with `mark_delete: true`) and only the
//! post-update pass removes it from the store. Once staged, an entity ignores
//! every further update.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

// =============================================================================
// TYPES
// =============================================================================

/// Entity id, unique within one room and one entity kind.
pub type EntityId = i64;

/// Position, rotation, scale and normal triples.
pub type Vec3 = [f64; 3];

/// Parent id used by placed models that hang off the scene root.
pub const NO_PARENT: EntityId = -1;

/// Version tag used when a placed model tracks the latest reconstruction.
pub const LIVE_VERSION: &str = "__LIVE_VERSION";

/// Which collection an entity lives in. Used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Model,
    Marker,
    Annotation,
    Measurement,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Marker => "marker",
            Self::Annotation => "annotation",
            Self::Measurement => "measurement",
        }
    }
}

/// Client requested mutation for marker-like entities. Wire values 0/1/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum EntityAction {
    Update,
    Create,
    Delete,
}

impl TryFrom<i64> for EntityAction {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Update),
            1 => Ok(Self::Create),
            2 => Ok(Self::Delete),
            other => Err(format!("unknown entity action: {other}")),
        }
    }
}

impl From<EntityAction> for i64 {
    fn from(action: EntityAction) -> Self {
        match action {
            EntityAction::Update => 0,
            EntityAction::Create => 1,
            EntityAction::Delete => 2,
        }
    }
}

/// Lifecycle flags shared by every entity kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// Changed since the last diff. Never leaves the server.
    #[serde(skip)]
    pub dirty: bool,
    #[serde(default)]
    pub mark_delete: bool,
}

// =============================================================================
// ENTITY TRAIT
// =============================================================================

/// Capability set of a scene entity: identifiable, diffable, deletable.
pub trait Entity: Clone {
    const KIND: EntityKind;

    fn id(&self) -> EntityId;

    fn set_id(&mut self, id: EntityId);

    fn lifecycle(&self) -> Lifecycle;

    fn lifecycle_mut(&mut self) -> &mut Lifecycle;

    /// Recompute server-derived fields after a payload change.
    fn normalize(&mut self) {}

    /// Replace the payload with `next`, keeping identity and lifecycle.
    fn overwrite(&mut self, mut next: Self) {
        next.set_id(self.id());
        *next.lifecycle_mut() = self.lifecycle();
        next.normalize();
        *self = next;
    }
}

// =============================================================================
// ENTITY KINDS
// =============================================================================

/// Reference to a model asset: `(model id, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef(pub String, pub String);

impl AssetRef {
    #[must_use]
    pub fn live(model_id: impl Into<String>) -> Self {
        Self(model_id.into(), LIVE_VERSION.to_owned())
    }
}

/// A model instance placed in the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedModel {
    #[serde(default)]
    pub id: EntityId,
    pub model_id: AssetRef,
    #[serde(default = "default_parent")]
    pub parent_id: EntityId,
    #[serde(default)]
    pub position: Vec3,
    #[serde(default)]
    pub rotation: Vec3,
    #[serde(default = "unit_scale")]
    pub scale: Vec3,
    #[serde(default = "default_true")]
    pub editable: bool,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

/// A spatial marker pinned to a surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    #[serde(default)]
    pub id: EntityId,
    pub position: Vec3,
    pub normal: Vec3,
    #[serde(rename = "type", default)]
    pub marker_type: i32,
    #[serde(default = "default_true")]
    pub visibility: bool,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

/// A note attached to another scene object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: EntityId,
    /// Kind of the annotated object (1 model, 2 marker, 3 measurement).
    pub target_kind: i32,
    pub target_id: EntityId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub auditor: String,
    #[serde(default)]
    pub safety_check_passed: bool,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

/// A distance measured between two points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    #[serde(default)]
    pub id: EntityId,
    pub start: Vec3,
    pub end: Vec3,
    /// Always computed server side from `start` and `end`.
    #[serde(default)]
    pub distance: f64,
    #[serde(flatten)]
    pub lifecycle: Lifecycle,
}

fn default_parent() -> EntityId {
    NO_PARENT
}

fn unit_scale() -> Vec3 {
    [1.0, 1.0, 1.0]
}

fn default_true() -> bool {
    true
}

macro_rules! impl_entity {
    ($ty:ty, $kind:expr) => {
        impl Entity for $ty {
            const KIND: EntityKind = $kind;

            fn id(&self) -> EntityId {
                self.id
            }

            fn set_id(&mut self, id: EntityId) {
                self.id = id;
            }

            fn lifecycle(&self) -> Lifecycle {
                self.lifecycle
            }

            fn lifecycle_mut(&mut self) -> &mut Lifecycle {
                &mut self.lifecycle
            }
        }
    };
}

impl_entity!(PlacedModel, EntityKind::Model);
impl_entity!(Marker, EntityKind::Marker);
impl_entity!(Annotation, EntityKind::Annotation);

impl Entity for Measurement {
    const KIND: EntityKind = EntityKind::Measurement;

    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn lifecycle_mut(&mut self) -> &mut Lifecycle {
        &mut self.lifecycle
    }

    fn normalize(&mut self) {
        self.distance = self
            .start
            .iter()
            .zip(self.end.iter())
            .map(|(a, b)| (b - a) * (b - a))
            .sum::<f64>()
            .sqrt();
    }
}

/// Transform diff for one placed model, as sent in batch updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTransformUpdate {
    pub id: EntityId,
    #[serde(default)]
    pub parent_id: Option<EntityId>,
    pub position: Vec3,
    pub rotation: Vec3,
    pub scale: Vec3,
    /// Delete the model after applying the transform.
    #[serde(default)]
    pub mark_delete: bool,
}

impl ModelTransformUpdate {
    pub fn apply_to(&self, model: &mut PlacedModel) {
        if let Some(parent_id) = self.parent_id {
            model.parent_id = parent_id;
        }
        model.position = self.position;
        model.rotation = self.rotation;
        model.scale = self.scale;
    }
}

// =============================================================================
// ENTITY STORE
// =============================================================================

/// One entity collection with its creation counter and deletion list.
#[derive(Debug, Clone)]
pub struct EntityStore<T> {
    entities: BTreeMap<EntityId, T>,
    creation_count: EntityId,
    pending_delete: Vec<EntityId>,
}

impl<T: Entity> Default for EntityStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { entities: BTreeMap::new(), creation_count: 0, pending_delete: Vec::new() }
    }

    /// Rebuild a store from persisted entities and counter.
    ///
    /// The counter is raised to the largest stored id so a damaged document
    /// can never hand out an id twice.
    #[must_use]
    pub fn from_parts(entities: Vec<T>, creation_count: EntityId) -> Self {
        let max_id = entities.iter().map(Entity::id).max().unwrap_or(0);
        let entities = entities
            .into_iter()
            .filter(|e| !e.lifecycle().mark_delete)
            .map(|mut e| {
                *e.lifecycle_mut() = Lifecycle::default();
                (e.id(), e)
            })
            .collect();
        Self { entities, creation_count: creation_count.max(max_id), pending_delete: Vec::new() }
    }

    /// Insert a new entity under the next id. Client supplied id and
    /// lifecycle flags are discarded.
    pub fn create(&mut self, mut entity: T) -> EntityId {
        self.creation_count += 1;
        let id = self.creation_count;
        entity.set_id(id);
        *entity.lifecycle_mut() = Lifecycle { dirty: true, mark_delete: false };
        entity.normalize();
        self.entities.insert(id, entity);
        id
    }

    /// Mutate a live entity in place and mark it dirty.
    ///
    /// Returns `false` (and does nothing) when the id is unknown or already
    /// staged for deletion.
    pub fn update(&mut self, id: EntityId, f: impl FnOnce(&mut T)) -> bool {
        let Some(entity) = self.entities.get_mut(&id) else {
            debug!(kind = T::KIND.as_str(), id, "update skipped: no such entity");
            return false;
        };
        if entity.lifecycle().mark_delete {
            debug!(kind = T::KIND.as_str(), id, "update skipped: entity is deleted");
            return false;
        }
        f(entity);
        entity.normalize();
        entity.lifecycle_mut().dirty = true;
        true
    }

    /// Stage an entity for deletion. It stays addressable until the next
    /// post-update pass.
    pub fn mark_deleted(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.entities.get_mut(&id) else {
            debug!(kind = T::KIND.as_str(), id, "delete skipped: no such entity");
            return false;
        };
        if entity.lifecycle().mark_delete {
            return false;
        }
        *entity.lifecycle_mut() = Lifecycle { dirty: true, mark_delete: true };
        self.pending_delete.push(id);
        true
    }

    /// Apply a marker-style create/update/delete request.
    pub fn apply(&mut self, action: EntityAction, payload: T) -> Option<EntityId> {
        match action {
            EntityAction::Create => Some(self.create(payload)),
            EntityAction::Update => {
                let id = payload.id();
                self.update(id, |entity| entity.overwrite(payload)).then_some(id)
            }
            EntityAction::Delete => {
                // Final diff carries the deleter's last state.
                let id = payload.id();
                self.update(id, |entity| entity.overwrite(payload));
                self.mark_deleted(id).then_some(id)
            }
        }
    }

    /// Collect every dirty entity and clear its flag.
    pub fn take_dirty(&mut self) -> Vec<T> {
        self.entities
            .values_mut()
            .filter(|e| e.lifecycle().dirty)
            .map(|e| {
                e.lifecycle_mut().dirty = false;
                e.clone()
            })
            .collect()
    }

    /// Physically remove entities staged for deletion.
    pub fn post_update(&mut self) {
        for id in self.pending_delete.drain(..) {
            self.entities.remove(&id);
        }
    }

    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.entities.get(&id)
    }

    /// All entities still present, in id order.
    #[must_use]
    pub fn all(&self) -> Vec<T> {
        self.entities.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    #[must_use]
    pub fn creation_count(&self) -> EntityId {
        self.creation_count
    }

    #[must_use]
    #[cfg(test)]
    pub fn pending_deletes(&self) -> &[EntityId] {
        &self.pending_delete
    }
}

#[cfg(test)]
#[path = "entity_test.rs"]
mod tests;
