//! Capture service: hosting, joining and driving live capture sessions.
//!
//! DESIGN
//! ======
//! A connection holds at most one seat (host or viewer) in one session,
//! recorded in `capture_members`. Every request resolves the caller's seat
//! from that table, so a viewer cannot act as host and nobody can act for
//! a session they are not seated in.
//!
//! Lock order is `capture_members`, then `sessions`, then one session lock.
//!
//! ERROR HANDLING
//! ==============
//! Seat and lookup failures return `SessionError`. Once the session has
//! processed its close, further actions are refused with `Closed`.

use std::sync::Arc;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::{HostSessionBody, JoinSessionBody, ModelVersionBody, SessionMarkerBody, TransformBody};
use crate::scene::action::SessionAction;
use crate::scene::session::{CaptureSession, SessionId, SessionJoinInfo};
use crate::scene::user::{ConnectionId, User, UserId};
use crate::state::{AppState, CaptureMember, CaptureRole};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("capture session not found: {0}")]
    NotFound(SessionId),
    #[error("connection already has a seat in capture session {0}")]
    AlreadySeated(SessionId),
    #[error("connection has no seat in the target capture session")]
    NotMember,
    #[error("only the session host may do this")]
    NotHost,
    #[error("capture session {0} is closed")]
    Closed(SessionId),
    #[error("no free session id after {0} attempts")]
    NoFreeSessionId(usize),
}

impl crate::frame::ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::AlreadySeated(_) => "E_ALREADY_REGISTERED",
            Self::NotMember => "E_NOT_MEMBER",
            Self::NotHost => "E_NOT_HOST",
            Self::Closed(_) => "E_SESSION_CLOSED",
            Self::NoFreeSessionId(_) => "E_SESSION_ID_EXHAUSTED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::NoFreeSessionId(_))
    }
}

/// Identity handed back to a new host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct HostedSession {
    pub session_id: SessionId,
    pub user_id: UserId,
}

// =============================================================================
// HOST / JOIN
// =============================================================================

/// Open a new session with the caller as host.
///
/// # Errors
///
/// `AlreadySeated` if the connection is in a session, `NoFreeSessionId`
/// when every id in range is taken.
pub async fn host_session(
    state: &AppState,
    connection: ConnectionId,
    body: HostSessionBody,
) -> Result<HostedSession, SessionError> {
    let mut members = state.capture_members.write().await;
    if let Some(seat) = members.get(&connection) {
        return Err(SessionError::AlreadySeated(seat.session_id));
    }

    let user_id = state.next_user_id();
    let host = User::new(user_id, &body.profile, connection, 0);
    let session_id = {
        let mut sessions = state.sessions.write().await;
        let session_id = free_session_id(state, |id| sessions.contains_key(&id))?;
        let session = CaptureSession::new(session_id, host, body.model_id.as_str(), body.version.as_str());
        sessions.insert(session_id, Arc::new(Mutex::new(session)));
        session_id
    };
    members.insert(connection, CaptureMember { user_id, session_id, role: CaptureRole::Host });

    info!(%connection, session_id, user_id, model_id = %body.model_id, version = %body.version, "capture session hosted");
    Ok(HostedSession { session_id, user_id })
}

fn free_session_id(state: &AppState, taken: impl Fn(SessionId) -> bool) -> Result<SessionId, SessionError> {
    let max = state.config.max_session_id;
    let attempts = usize::try_from(max).unwrap_or(usize::MAX).saturating_mul(2);
    let mut rng = rand::rng();
    for _ in 0..attempts {
        let candidate = rng.random_range(1..=max);
        if !taken(candidate) {
            return Ok(candidate);
        }
    }
    warn!(max_session_id = max, "capture session id space exhausted");
    Err(SessionError::NoFreeSessionId(attempts))
}

/// Seat the caller as a viewer and return what it needs to render.
///
/// # Errors
///
/// `AlreadySeated`, `NotFound`, or `Closed` if the session already closed.
pub async fn join_session(
    state: &AppState,
    connection: ConnectionId,
    body: JoinSessionBody,
) -> Result<SessionJoinInfo, SessionError> {
    let mut members = state.capture_members.write().await;
    if let Some(seat) = members.get(&connection) {
        return Err(SessionError::AlreadySeated(seat.session_id));
    }
    let session = state
        .sessions
        .read()
        .await
        .get(&body.session_id)
        .cloned()
        .ok_or(SessionError::NotFound(body.session_id))?;

    let user_id = state.next_user_id();
    let info = {
        let mut session = session.lock().await;
        if session.is_closed() {
            return Err(SessionError::Closed(body.session_id));
        }
        session.add_viewer(User::new(user_id, &body.profile, connection, 0));
        info!(%connection, session_id = body.session_id, user_id, viewers = session.viewer_count(), "viewer joined capture session");
        session.join_info(user_id)
    };
    members.insert(connection, CaptureMember { user_id, session_id: body.session_id, role: CaptureRole::Viewer });
    Ok(info)
}

// =============================================================================
// LEAVE / CLOSE
// =============================================================================

/// Close a session. Host only.
///
/// # Errors
///
/// `NotMember` if the caller has no seat in `session_id`, `NotHost` for
/// viewers, `Closed` if it already closed.
pub async fn close_session(state: &AppState, connection: ConnectionId, session_id: SessionId) -> Result<(), SessionError> {
    let seat = seat_in(state, connection, session_id).await?;
    if seat.role != CaptureRole::Host {
        return Err(SessionError::NotHost);
    }
    enqueue(state, session_id, SessionAction::Close).await?;
    state.capture_members.write().await.remove(&connection);
    info!(%connection, session_id, "capture session close requested");
    Ok(())
}

/// Give up the caller's seat. A leaving host closes the session.
///
/// # Errors
///
/// `NotMember` if the caller has no seat in `session_id`.
pub async fn leave_session(state: &AppState, connection: ConnectionId, session_id: SessionId) -> Result<(), SessionError> {
    let seat = seat_in(state, connection, session_id).await?;
    state.capture_members.write().await.remove(&connection);
    release_seat(state, seat).await;
    info!(%connection, session_id, user_id = seat.user_id, "left capture session");
    Ok(())
}

/// Connection closed: release whatever seat it held.
pub async fn disconnect(state: &AppState, connection: ConnectionId) {
    let Some(seat) = state.capture_members.write().await.remove(&connection) else {
        return;
    };
    release_seat(state, seat).await;
    info!(%connection, session_id = seat.session_id, role = ?seat.role, "capture seat released on disconnect");
}

async fn release_seat(state: &AppState, seat: CaptureMember) {
    let action = match seat.role {
        CaptureRole::Host => SessionAction::Close,
        CaptureRole::Viewer => SessionAction::Logout { user_id: seat.user_id },
    };
    if let Err(e) = enqueue(state, seat.session_id, action).await {
        debug!(session_id = seat.session_id, error = %e, "seat release after session ended");
    }
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Switch the session to a new model version. Host only.
///
/// # Errors
///
/// `NotMember` without a seat, `NotHost` for viewers, `Closed`.
pub async fn update_model_version(
    state: &AppState,
    connection: ConnectionId,
    body: ModelVersionBody,
) -> Result<(), SessionError> {
    let seat = seat(state, connection).await?;
    if seat.role != CaptureRole::Host {
        return Err(SessionError::NotHost);
    }
    info!(session_id = seat.session_id, model_id = %body.model_id, version = %body.version, "capture model version updated");
    enqueue(
        state,
        seat.session_id,
        SessionAction::UpdateModelVersion { model_id: body.model_id, version: body.version },
    )
    .await
}

/// Update the caller's own position and rotation.
///
/// # Errors
///
/// `NotMember` without a seat, `Closed`.
pub async fn user_update(state: &AppState, connection: ConnectionId, body: TransformBody) -> Result<(), SessionError> {
    let seat = seat(state, connection).await?;
    enqueue(
        state,
        seat.session_id,
        SessionAction::UserTransform { user_id: seat.user_id, position: body.user_position, rotation: body.user_rotation },
    )
    .await
}

/// Create, update or delete a session marker.
///
/// # Errors
///
/// `NotMember` if the caller has no seat in the named session, `Closed`.
pub async fn marker_update(state: &AppState, connection: ConnectionId, body: SessionMarkerBody) -> Result<(), SessionError> {
    seat_in(state, connection, body.session_id).await?;
    enqueue(state, body.session_id, SessionAction::Marker { action: body.action, marker: body.marker_info }).await
}

// =============================================================================
// HELPERS
// =============================================================================

async fn seat(state: &AppState, connection: ConnectionId) -> Result<CaptureMember, SessionError> {
    state
        .capture_members
        .read()
        .await
        .get(&connection)
        .copied()
        .ok_or(SessionError::NotMember)
}

async fn seat_in(state: &AppState, connection: ConnectionId, session_id: SessionId) -> Result<CaptureMember, SessionError> {
    let seat = seat(state, connection).await?;
    if seat.session_id != session_id {
        return Err(SessionError::NotMember);
    }
    Ok(seat)
}

async fn enqueue(state: &AppState, session_id: SessionId, action: SessionAction) -> Result<(), SessionError> {
    let session = state
        .sessions
        .read()
        .await
        .get(&session_id)
        .cloned()
        .ok_or(SessionError::NotFound(session_id))?;
    session
        .lock()
        .await
        .enqueue(action)
        .map_err(|_| SessionError::Closed(session_id))
}

#[cfg(test)]
#[path = "capture_test.rs"]
mod tests;
