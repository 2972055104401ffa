//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is the explicit server context: built once in `main`, cloned
//! into every Axum handler via the `State` extractor and into the tick task.
//! It owns the process-wide tables:
//!
//! - `rooms` / `sessions`: resident rooms and capture sessions, each behind
//!   its own mutex.
//! - `users`: connection -> registered editing user.
//! - `capture_members`: connection -> role in a capture session.
//! - `connections`: connection -> outbound frame sender. The only place a
//!   transport handle lives.
//!
//! LOCK ORDER
//! ==========
//! A table lock may be held while taking one room or session lock, never the
//! reverse, and never two room locks at once. Frames are delivered with
//! `try_send` after the room lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, RwLock, mpsc};

use crate::config::ServerConfig;
use crate::frame::Frame;
use crate::scene::room::{Room, RoomId};
use crate::scene::session::{CaptureSession, SessionId};
use crate::scene::user::{ConnectionId, UserId, UserProfile};
use crate::services::store::RoomStore;

// =============================================================================
// REGISTRY ENTRIES
// =============================================================================

/// A connection's current visit to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomVisit {
    pub room_id: RoomId,
    pub membership: u64,
}

/// A registered editing client.
#[derive(Debug, Clone)]
pub struct EditingUser {
    pub id: UserId,
    pub profile: UserProfile,
    pub room: Option<RoomVisit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRole {
    Host,
    Viewer,
}

/// A connection's seat in a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMember {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub role: CaptureRole,
}

pub type SharedRoom = Arc<Mutex<Room>>;
pub type SharedSession = Arc<Mutex<CaptureSession>>;

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<dyn RoomStore>,
    pub rooms: Arc<RwLock<HashMap<RoomId, SharedRoom>>>,
    pub sessions: Arc<RwLock<HashMap<SessionId, SharedSession>>>,
    pub users: Arc<RwLock<HashMap<ConnectionId, EditingUser>>>,
    pub capture_members: Arc<RwLock<HashMap<ConnectionId, CaptureMember>>>,
    pub connections: Arc<RwLock<HashMap<ConnectionId, mpsc::Sender<Frame>>>>,
    /// Serializes room id allocation against the store.
    pub(crate) room_creation: Arc<Mutex<()>>,
    user_ids: Arc<AtomicU64>,
    memberships: Arc<AtomicU64>,
}

impl AppState {
    #[must_use]
    pub fn new(config: ServerConfig, store: Arc<dyn RoomStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            users: Arc::new(RwLock::new(HashMap::new())),
            capture_members: Arc::new(RwLock::new(HashMap::new())),
            connections: Arc::new(RwLock::new(HashMap::new())),
            room_creation: Arc::new(Mutex::new(())),
            user_ids: Arc::new(AtomicU64::new(1)),
            memberships: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Next process-unique user id. Starts at 1, never reused.
    #[must_use]
    pub fn next_user_id(&self) -> UserId {
        self.user_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Next visit token for room membership.
    #[must_use]
    pub fn next_membership(&self) -> u64 {
        self.memberships.fetch_add(1, Ordering::Relaxed)
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::services::store::MemoryRoomStore;
    use tokio::time::{Duration, timeout};

    /// Create a test `AppState` on an in-memory store.
    #[must_use]
    pub fn test_app_state() -> AppState {
        test_app_state_with_store(Arc::new(MemoryRoomStore::new()))
    }

    #[must_use]
    pub fn test_app_state_with_store(store: Arc<dyn RoomStore>) -> AppState {
        AppState::new(ServerConfig::default(), store)
    }

    /// Register a live connection and return its id and frame receiver.
    pub async fn connect(state: &AppState) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let connection = ConnectionId::new();
        let (tx, rx) = mpsc::channel(64);
        state.connections.write().await.insert(connection, tx);
        (connection, rx)
    }

    /// Persist a base-scene room directly into the store.
    pub async fn seed_room(state: &AppState, room_id: RoomId) {
        let snapshot = Room::with_base_scene(room_id, "Seeded", "scan-seed", "tests").snapshot();
        state.store.save_room(&snapshot).await.expect("seed save should succeed");
    }

    pub async fn recv_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
        timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("frame receive timed out")
            .expect("channel closed")
    }

    pub async fn assert_no_frame(rx: &mut mpsc::Receiver<Frame>) {
        assert!(
            timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
            "expected channel to remain empty"
        );
    }

    /// Discard everything already queued on `rx`.
    pub fn drain(rx: &mut mpsc::Receiver<Frame>) {
        while rx.try_recv().is_ok() {}
    }
}
