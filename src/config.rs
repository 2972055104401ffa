//! Server configuration loaded from environment variables.
//!
//! Every knob has a `DEFAULT_*` constant; unparsable values fall back to the
//! default rather than failing startup.

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TICK_INTERVAL_MS: u64 = 50;
const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_MAX_ROOM_ID: i64 = 1000;
const DEFAULT_ROOM_ID_ATTEMPTS: usize = 64;
const DEFAULT_MAX_SESSION_ID: i64 = 999;

/// Process configuration. Built once at startup and shared read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// Period of the global synchronization tick.
    pub tick_interval_ms: u64,
    /// Outbound frame buffer per connection. Frames beyond it are dropped.
    pub client_channel_capacity: usize,
    /// Room ids are drawn uniformly from `1..=max_room_id`.
    pub max_room_id: i64,
    /// Random draws tried before room creation gives up.
    pub room_id_attempts: usize,
    /// Session ids are drawn uniformly from `1..=max_session_id`.
    pub max_session_id: i64,
    /// Postgres URL. When absent the server keeps rooms in memory only.
    pub database_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            client_channel_capacity: DEFAULT_CLIENT_CHANNEL_CAPACITY,
            max_room_id: DEFAULT_MAX_ROOM_ID,
            room_id_attempts: DEFAULT_ROOM_ID_ATTEMPTS,
            max_session_id: DEFAULT_MAX_SESSION_ID,
            database_url: None,
        }
    }
}

impl ServerConfig {
    /// Read configuration from the process environment.
    ///
    /// - `PORT`, `TICK_INTERVAL_MS`, `CLIENT_CHANNEL_CAPACITY`
    /// - `MAX_ROOM_ID`, `ROOM_ID_ATTEMPTS`, `MAX_SESSION_ID`
    /// - `DATABASE_URL` (optional; empty counts as unset)
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            tick_interval_ms: env_parse("TICK_INTERVAL_MS", DEFAULT_TICK_INTERVAL_MS).max(1),
            client_channel_capacity: env_parse("CLIENT_CHANNEL_CAPACITY", DEFAULT_CLIENT_CHANNEL_CAPACITY).max(1),
            max_room_id: env_parse("MAX_ROOM_ID", DEFAULT_MAX_ROOM_ID).max(1),
            room_id_attempts: env_parse("ROOM_ID_ATTEMPTS", DEFAULT_ROOM_ID_ATTEMPTS).max(1),
            max_session_id: env_parse("MAX_SESSION_ID", DEFAULT_MAX_SESSION_ID).max(1),
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
