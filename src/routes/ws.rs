//! WebSocket handler: per-connection frame loop and request dispatch.
//!
//! DESIGN
//! ======
//! On upgrade, the connection gets a `ConnectionId` and a bounded outbound
//! channel registered in `AppState::connections`, then enters a `select!`
//! loop:
//! - Incoming client frames → parse into a `Request` → dispatch → reply
//! - Frames pushed by the tick task or other handlers → forward to client
//!
//! Handler arms only call into services and return an `Outcome`; this
//! module turns the outcome into the reply frame. Replies are written
//! straight to the socket, so a client always gets its replies in request
//! order.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → push `CONNECTION_INIT` with `connection_id`
//! 2. Client sends frames → dispatch → reply on the socket
//! 3. Close → release editing user and capture seat → drop the sender

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::frame::{Data, Frame, to_data};
use crate::protocol::{ProtocolError, Request, push};
use crate::scene::action::EntityPayload;
use crate::scene::entity::EntityAction;
use crate::scene::user::ConnectionId;
use crate::services::{capture, editing};
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// What a handled request answers with.
enum Outcome {
    /// Success reply carrying a payload.
    Reply(Data),
    /// Bare success reply.
    Done,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection = ConnectionId::new();
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);
    state.connections.write().await.insert(connection, client_tx);

    let welcome = Frame::push(push::CONNECTION_INIT, Data::new()).with_data("connection_id", connection.to_string());
    if send_frame(&mut socket, &welcome).await.is_ok() {
        info!(%connection, "ws: client connected");
        loop {
            tokio::select! {
                msg = socket.recv() => {
                    let Some(Ok(msg)) = msg else { break };
                    match msg {
                        Message::Text(text) => {
                            let reply = process_inbound_text(&state, connection, text.as_str()).await;
                            if send_frame(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(frame) = client_rx.recv() => {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    disconnect(&state, connection).await;
    info!(%connection, "ws: client disconnected");
}

/// Release everything the connection holds. Safe to call more than once.
pub(crate) async fn disconnect(state: &AppState, connection: ConnectionId) {
    editing::disconnect(state, connection).await;
    capture::disconnect(state, connection).await;
    state.connections.write().await.remove(&connection);
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and handle one inbound text frame; returns the reply for the sender.
async fn process_inbound_text(state: &AppState, connection: ConnectionId, text: &str) -> Frame {
    let req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%connection, error = %e, "ws: invalid inbound frame");
            return Frame::detached_error(&ProtocolError::Malformed(e));
        }
    };

    let request = match Request::parse(&req) {
        Ok(request) => request,
        Err(e) => {
            warn!(%connection, code = req.code, error = %e, "ws: rejected frame");
            return req.fail(&e);
        }
    };
    debug!(%connection, code = req.code, op = request.name(), "ws: recv frame");

    match handle_request(state, connection, &req, request).await {
        Ok(Outcome::Reply(data)) => req.reply(data),
        Ok(Outcome::Done) => req.ok(),
        Err(err_frame) => err_frame,
    }
}

async fn handle_request(
    state: &AppState,
    connection: ConnectionId,
    req: &Frame,
    request: Request,
) -> Result<Outcome, Frame> {
    match request {
        // ---------------------------------------------------------------------
        // editing
        // ---------------------------------------------------------------------
        Request::FetchRoomPreviews => {
            let previews = editing::fetch_previews(state).await.map_err(|e| req.fail(&e))?;
            reply_with(req, "room_previews", &previews)
        }
        Request::CreateEmptyRoom(body) => {
            let room_id = editing::create_empty_room(state, &body.room_name, &body.base_scene_id, &body.authors)
                .await
                .map_err(|e| req.fail(&e))?;
            reply_with(req, "room_id", &room_id)
        }
        Request::StartRoom => Ok(Outcome::Done),
        Request::JoinRoom(body) => {
            editing::join_room(state, connection, body.room_id).await.map_err(|e| req.fail(&e))?;
            reply_with(req, "room_id", &body.room_id)
        }
        Request::ExitRoom => {
            editing::exit_room(state, connection).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
        Request::RegisterUser(profile) => {
            let user_id = editing::register_user(state, connection, profile).await.map_err(|e| req.fail(&e))?;
            reply_with(req, "user_id", &user_id)
        }
        Request::FetchRoomObjects => {
            let objects = editing::fetch_room_objects(state, connection).await.map_err(|e| req.fail(&e))?;
            reply_fields(req, &objects)
        }
        Request::CreateModelInstance(model) => {
            editing::create_entity(state, connection, EntityPayload::Model(model)).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
        Request::BatchUpdate(body) => {
            editing::batch_update(state, connection, body).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
        Request::UpdateMarker(body) => {
            editing::update_marker_in(state, connection, body.room_id, body.action, body.marker_info)
                .await
                .map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
        Request::CreateAnnotation(annotation) => {
            let payload = EntityPayload::Annotation(annotation);
            editing::modify_entity(state, connection, EntityAction::Create, payload).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
        Request::CreateMeasurement(measurement) => {
            let payload = EntityPayload::Measurement(measurement);
            editing::modify_entity(state, connection, EntityAction::Create, payload).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
        Request::UpdateAnnotation(change) => {
            let payload = EntityPayload::Annotation(change.annotation_info);
            editing::modify_entity(state, connection, change.action, payload).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
        Request::UpdateMeasurement(change) => {
            let payload = EntityPayload::Measurement(change.measurement_info);
            editing::modify_entity(state, connection, change.action, payload).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }

        // ---------------------------------------------------------------------
        // capture
        // ---------------------------------------------------------------------
        Request::HostSession(body) => {
            let hosted = capture::host_session(state, connection, body).await.map_err(|e| req.fail(&e))?;
            reply_fields(req, &hosted)
        }
        Request::CloseSession(body) => {
            capture::close_session(state, connection, body.session_id).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
        Request::JoinSession(body) => {
            let info = capture::join_session(state, connection, body).await.map_err(|e| req.fail(&e))?;
            reply_fields(req, &info)
        }
        Request::LeaveSession(body) => {
            capture::leave_session(state, connection, body.session_id).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
        Request::UpdateModelVersion(body) => {
            capture::update_model_version(state, connection, body).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
        Request::SessionUserUpdate(body) => {
            capture::user_update(state, connection, body).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
        Request::SessionMarkerUpdate(body) => {
            capture::marker_update(state, connection, body).await.map_err(|e| req.fail(&e))?;
            Ok(Outcome::Done)
        }
    }
}

/// Reply whose payload is `value`'s fields.
fn reply_fields(req: &Frame, value: &impl Serialize) -> Result<Outcome, Frame> {
    to_data(value).map(Outcome::Reply).map_err(|e| encode_failure(req, e))
}

/// Reply carrying `value` under a single key.
fn reply_with(req: &Frame, key: &str, value: &impl Serialize) -> Result<Outcome, Frame> {
    let value = serde_json::to_value(value).map_err(|e| encode_failure(req, e))?;
    let mut data = Data::new();
    data.insert(key.into(), value);
    Ok(Outcome::Reply(data))
}

fn encode_failure(req: &Frame, e: serde_json::Error) -> Frame {
    warn!(code = req.code, error = %e, "ws: reply serialization failed");
    req.fail(&ProtocolError::Encode(e))
}

// =============================================================================
// SEND
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, code = frame.code, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.success() == Some(false) {
        let code = frame.data.get("code").and_then(|v| v.as_str()).unwrap_or("-");
        let reason = frame.data.get("reason").and_then(|v| v.as_str()).unwrap_or("-");
        warn!(code, reason, "ws: send frame success=false");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
