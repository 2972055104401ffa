//! Users as seen from inside a room or capture session.
//!
//! A `User` never holds a transport handle. It carries the stable
//! `ConnectionId` of the socket that owns it; the websocket layer resolves
//! that id to a live sender when something has to be delivered.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::Vec3;

/// Process-unique user id, assigned on registration and never reused.
pub type UserId = u64;

/// Stable opaque handle for one websocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Display attributes a client supplies when it registers or joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_color")]
    pub color: Vec3,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self { username: default_username(), color: default_color() }
    }
}

fn default_username() -> String {
    "John Doe".to_owned()
}

fn default_color() -> Vec3 {
    [0.2, 0.2, 0.2]
}

/// A user present in a room or session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub color: Vec3,
    pub position: Vec3,
    pub rotation: Vec3,
    /// Departed; announced in one more roster before removal.
    pub deleted: bool,
    #[serde(skip)]
    pub connection: ConnectionId,
    /// Token for this particular visit. A removal carrying an older token
    /// is ignored.
    #[serde(skip)]
    pub membership: u64,
}

impl User {
    #[must_use]
    pub fn new(id: UserId, profile: &UserProfile, connection: ConnectionId, membership: u64) -> Self {
        Self {
            id,
            username: profile.username.clone(),
            color: profile.color,
            position: [0.0; 3],
            rotation: [0.0; 3],
            deleted: false,
            connection,
            membership,
        }
    }
}
