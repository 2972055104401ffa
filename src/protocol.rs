//! Protocol surface: operation codes and typed request bodies.
//!
//! DESIGN
//! ======
//! Inbound frames are turned into one closed `Request` union by
//! `Request::parse`; the websocket dispatcher matches on it exhaustively.
//! Adding an operation means adding a code, a variant and a match arm, all
//! checked by the compiler.

use serde::Deserialize;

use crate::frame::Frame;
use crate::scene::entity::{Annotation, EntityAction, Marker, Measurement, ModelTransformUpdate, PlacedModel, Vec3};
use crate::scene::room::RoomId;
use crate::scene::session::SessionId;
use crate::scene::user::UserProfile;

// =============================================================================
// CODES
// =============================================================================

/// Client -> server request codes.
pub mod request {
    pub const FETCH_ROOM_PREVIEWS: i32 = 101;
    pub const CREATE_EMPTY_ROOM: i32 = 102;
    pub const START_ROOM: i32 = 103;
    pub const JOIN_ROOM: i32 = 104;
    pub const EXIT_ROOM: i32 = 105;
    pub const REGISTER_USER: i32 = 106;
    pub const FETCH_ROOM_OBJECTS: i32 = 107;
    pub const CREATE_MODEL_INSTANCE: i32 = 108;
    pub const BATCH_UPDATE: i32 = 109;
    pub const UPDATE_MARKER: i32 = 110;
    pub const CREATE_ANNOTATION: i32 = 111;
    pub const CREATE_MEASUREMENT: i32 = 112;
    pub const UPDATE_ANNOTATION: i32 = 113;
    pub const UPDATE_MEASUREMENT: i32 = 114;

    pub const HOST_SESSION: i32 = 201;
    pub const CLOSE_SESSION: i32 = 202;
    pub const JOIN_SESSION: i32 = 203;
    pub const LEAVE_SESSION: i32 = 204;
    pub const UPDATE_MODEL_VERSION: i32 = 205;
    pub const SESSION_USER_UPDATE: i32 = 206;
    pub const SESSION_MARKER_UPDATE: i32 = 207;
}

/// Server -> client push codes.
pub mod push {
    pub const CONNECTION_INIT: i32 = -1;
    pub const SESSION_UPDATE: i32 = -3;
    pub const NEW_RECONSTRUCTION: i32 = -4;
    pub const ROOM_PREVIEWS_CHANGED: i32 = -5;
    pub const CAPTURE_UPDATE: i32 = -6;
    pub const CAPTURE_CLOSED: i32 = -7;
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown operation code: {0}")]
    UnknownCode(i32),
    #[error("invalid payload for code {code}: {source}")]
    InvalidPayload {
        code: i32,
        #[source]
        source: serde_json::Error,
    },
    #[error("reply could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
}

impl crate::frame::ErrorCode for ProtocolError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "E_MALFORMED_FRAME",
            Self::UnknownCode(_) => "E_UNKNOWN_CODE",
            Self::InvalidPayload { .. } => "E_INVALID_PAYLOAD",
            Self::Encode(_) => "E_ENCODE",
        }
    }
}

// =============================================================================
// REQUEST BODIES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreateRoomBody {
    #[serde(alias = "roomName")]
    pub room_name: String,
    #[serde(alias = "baseReconstructionID")]
    pub base_scene_id: String,
    #[serde(default)]
    pub authors: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RoomRef {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarkerChange {
    pub marker_info: Marker,
    pub action: EntityAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchUpdateBody {
    #[serde(default)]
    pub model_states: Vec<ModelTransformUpdate>,
    #[serde(default)]
    pub marker_states: Vec<MarkerChange>,
    #[serde(default)]
    pub user_position: Option<Vec3>,
    #[serde(default)]
    pub user_rotation: Option<Vec3>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomMarkerBody {
    pub room_id: RoomId,
    pub marker_info: Marker,
    pub action: EntityAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AnnotationChange {
    pub annotation_info: Annotation,
    pub action: EntityAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeasurementChange {
    pub measurement_info: Measurement,
    pub action: EntityAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HostSessionBody {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub model_id: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SessionRef {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JoinSessionBody {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub profile: UserProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelVersionBody {
    pub model_id: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransformBody {
    pub user_position: Vec3,
    pub user_rotation: Vec3,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionMarkerBody {
    pub session_id: SessionId,
    pub marker_info: Marker,
    pub action: EntityAction,
}

// =============================================================================
// REQUEST
// =============================================================================

/// Every operation a client can ask for.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    FetchRoomPreviews,
    CreateEmptyRoom(CreateRoomBody),
    StartRoom,
    JoinRoom(RoomRef),
    ExitRoom,
    RegisterUser(UserProfile),
    FetchRoomObjects,
    CreateModelInstance(PlacedModel),
    BatchUpdate(BatchUpdateBody),
    UpdateMarker(RoomMarkerBody),
    CreateAnnotation(Annotation),
    CreateMeasurement(Measurement),
    UpdateAnnotation(AnnotationChange),
    UpdateMeasurement(MeasurementChange),
    HostSession(HostSessionBody),
    CloseSession(SessionRef),
    JoinSession(JoinSessionBody),
    LeaveSession(SessionRef),
    UpdateModelVersion(ModelVersionBody),
    SessionUserUpdate(TransformBody),
    SessionMarkerUpdate(SessionMarkerBody),
}

impl Request {
    /// Decode a frame into a typed request.
    ///
    /// # Errors
    ///
    /// Returns `UnknownCode` for codes outside the table and
    /// `InvalidPayload` when the body does not match the operation.
    pub fn parse(frame: &Frame) -> Result<Self, ProtocolError> {
        use request::*;

        let request = match frame.code {
            FETCH_ROOM_PREVIEWS => Self::FetchRoomPreviews,
            CREATE_EMPTY_ROOM => Self::CreateEmptyRoom(body(frame)?),
            START_ROOM => Self::StartRoom,
            JOIN_ROOM => Self::JoinRoom(body(frame)?),
            EXIT_ROOM => Self::ExitRoom,
            REGISTER_USER => Self::RegisterUser(body(frame)?),
            FETCH_ROOM_OBJECTS => Self::FetchRoomObjects,
            CREATE_MODEL_INSTANCE => Self::CreateModelInstance(body(frame)?),
            BATCH_UPDATE => Self::BatchUpdate(body(frame)?),
            UPDATE_MARKER => Self::UpdateMarker(body(frame)?),
            CREATE_ANNOTATION => Self::CreateAnnotation(body(frame)?),
            CREATE_MEASUREMENT => Self::CreateMeasurement(body(frame)?),
            UPDATE_ANNOTATION => Self::UpdateAnnotation(body(frame)?),
            UPDATE_MEASUREMENT => Self::UpdateMeasurement(body(frame)?),
            HOST_SESSION => Self::HostSession(body(frame)?),
            CLOSE_SESSION => Self::CloseSession(body(frame)?),
            JOIN_SESSION => Self::JoinSession(body(frame)?),
            LEAVE_SESSION => Self::LeaveSession(body(frame)?),
            UPDATE_MODEL_VERSION => Self::UpdateModelVersion(body(frame)?),
            SESSION_USER_UPDATE => Self::SessionUserUpdate(body(frame)?),
            SESSION_MARKER_UPDATE => Self::SessionMarkerUpdate(body(frame)?),
            other => return Err(ProtocolError::UnknownCode(other)),
        };
        Ok(request)
    }

    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::FetchRoomPreviews => "fetch_room_previews",
            Self::CreateEmptyRoom(_) => "create_empty_room",
            Self::StartRoom => "start_room",
            Self::JoinRoom(_) => "join_room",
            Self::ExitRoom => "exit_room",
            Self::RegisterUser(_) => "register_user",
            Self::FetchRoomObjects => "fetch_room_objects",
            Self::CreateModelInstance(_) => "create_model_instance",
            Self::BatchUpdate(_) => "batch_update",
            Self::UpdateMarker(_) => "update_marker",
            Self::CreateAnnotation(_) => "create_annotation",
            Self::CreateMeasurement(_) => "create_measurement",
            Self::UpdateAnnotation(_) => "update_annotation",
            Self::UpdateMeasurement(_) => "update_measurement",
            Self::HostSession(_) => "host_session",
            Self::CloseSession(_) => "close_session",
            Self::JoinSession(_) => "join_session",
            Self::LeaveSession(_) => "leave_session",
            Self::UpdateModelVersion(_) => "update_model_version",
            Self::SessionUserUpdate(_) => "session_user_update",
            Self::SessionMarkerUpdate(_) => "session_marker_update",
        }
    }
}

fn body<T: serde::de::DeserializeOwned>(frame: &Frame) -> Result<T, ProtocolError> {
    frame
        .payload()
        .map_err(|source| ProtocolError::InvalidPayload { code: frame.code, source })
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
