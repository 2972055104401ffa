//! Room store: load/save adapter for persisted room documents.
//!
//! DESIGN
//! ======
//! The coordinator only ever sees the `RoomStore` trait. `PgRoomStore` keeps
//! one JSONB document per room next to denormalized preview columns, plus a
//! table of known model versions used to validate base scenes.
//! `MemoryRoomStore` backs tests and database-less runs.
//!
//! ERROR HANDLING
//! ==============
//! Store failures are surfaced as `StoreError` and marked retryable. Callers
//! that persist during eviction keep the room resident on failure.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::scene::room::{RoomId, RoomMeta, RoomSnapshot};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("room document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_STORE",
            Self::Encoding(_) => "E_STORE_ENCODING",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Persistence collaborator for room snapshots and model metadata.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn load_room(&self, room_id: RoomId) -> Result<Option<RoomSnapshot>, StoreError>;

    /// Insert or replace the document for `snapshot.meta.room_id`.
    async fn save_room(&self, snapshot: &RoomSnapshot) -> Result<(), StoreError>;

    async fn room_exists(&self, room_id: RoomId) -> Result<bool, StoreError>;

    /// Metadata of every persisted room, newest first.
    async fn list_previews(&self) -> Result<Vec<RoomMeta>, StoreError>;

    /// Whether any version of `model_id` has been registered.
    async fn base_scene_exists(&self, model_id: &str) -> Result<bool, StoreError>;

    async fn register_model_version(&self, model_id: &str, version: &str) -> Result<(), StoreError>;
}

// =============================================================================
// POSTGRES
// =============================================================================

pub struct PgRoomStore {
    pool: PgPool,
}

impl PgRoomStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RoomStore for PgRoomStore {
    async fn load_room(&self, room_id: RoomId) -> Result<Option<RoomSnapshot>, StoreError> {
        let row = sqlx::query_scalar::<_, serde_json::Value>("SELECT document FROM rooms WHERE room_id = $1")
            .bind(room_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(document) = row else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(document)?))
    }

    async fn save_room(&self, snapshot: &RoomSnapshot) -> Result<(), StoreError> {
        let document = serde_json::to_value(snapshot)?;
        let meta = &snapshot.meta;
        sqlx::query(
            "INSERT INTO rooms (room_id, name, description, authors, created_at_ms, modified_at_ms, document)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (room_id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                authors = EXCLUDED.authors,
                modified_at_ms = EXCLUDED.modified_at_ms,
                document = EXCLUDED.document",
        )
        .bind(meta.room_id)
        .bind(&meta.name)
        .bind(&meta.description)
        .bind(&meta.authors)
        .bind(meta.created_at_ms)
        .bind(meta.modified_at_ms)
        .bind(document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn room_exists(&self, room_id: RoomId) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM rooms WHERE room_id = $1)")
            .bind(room_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn list_previews(&self) -> Result<Vec<RoomMeta>, StoreError> {
        let rows = sqlx::query_as::<_, (i64, String, String, String, i64, i64)>(
            "SELECT room_id, name, description, authors, created_at_ms, modified_at_ms
             FROM rooms
             ORDER BY modified_at_ms DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(room_id, name, description, authors, created_at_ms, modified_at_ms)| RoomMeta {
                room_id,
                name,
                description,
                authors,
                created_at_ms,
                modified_at_ms,
            })
            .collect())
    }

    async fn base_scene_exists(&self, model_id: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM model_versions WHERE model_id = $1)")
            .bind(model_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn register_model_version(&self, model_id: &str, version: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO model_versions (model_id, version) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(model_id)
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<RoomId, RoomSnapshot>>,
    models: RwLock<HashSet<(String, String)>>,
}

impl MemoryRoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn load_room(&self, room_id: RoomId) -> Result<Option<RoomSnapshot>, StoreError> {
        Ok(self.rooms.read().await.get(&room_id).cloned())
    }

    async fn save_room(&self, snapshot: &RoomSnapshot) -> Result<(), StoreError> {
        let mut rooms = self.rooms.write().await;
        rooms.insert(snapshot.meta.room_id, snapshot.clone());
        Ok(())
    }

    async fn room_exists(&self, room_id: RoomId) -> Result<bool, StoreError> {
        Ok(self.rooms.read().await.contains_key(&room_id))
    }

    async fn list_previews(&self) -> Result<Vec<RoomMeta>, StoreError> {
        let rooms = self.rooms.read().await;
        let mut previews: Vec<RoomMeta> = rooms.values().map(|s| s.meta.clone()).collect();
        previews.sort_by(|a, b| b.modified_at_ms.cmp(&a.modified_at_ms).then(a.room_id.cmp(&b.room_id)));
        Ok(previews)
    }

    async fn base_scene_exists(&self, model_id: &str) -> Result<bool, StoreError> {
        Ok(self.models.read().await.iter().any(|(id, _)| id == model_id))
    }

    async fn register_model_version(&self, model_id: &str, version: &str) -> Result<(), StoreError> {
        self.models
            .write()
            .await
            .insert((model_id.to_owned(), version.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
