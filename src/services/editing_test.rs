use super::*;
use crate::config::ServerConfig;
use crate::frame::ErrorCode;
use crate::protocol::MarkerChange;
use crate::scene::entity::{AssetRef, Lifecycle, ModelTransformUpdate, NO_PARENT, PlacedModel};
use crate::services::store::MemoryRoomStore;
use crate::state::test_helpers;

fn profile(name: &str) -> UserProfile {
    UserProfile { username: name.into(), ..UserProfile::default() }
}

fn marker() -> Marker {
    Marker {
        id: 0,
        position: [1.0, 2.0, 3.0],
        normal: [0.0, 1.0, 0.0],
        marker_type: 1,
        visibility: true,
        lifecycle: Lifecycle::default(),
    }
}

fn crate_model() -> PlacedModel {
    PlacedModel {
        id: 0,
        model_id: AssetRef("crate".into(), "v2".into()),
        parent_id: NO_PARENT,
        position: [0.0; 3],
        rotation: [0.0; 3],
        scale: [1.0; 3],
        editable: true,
        lifecycle: Lifecycle::default(),
    }
}

async fn resident(state: &AppState, room_id: RoomId) -> SharedRoom {
    state.rooms.read().await.get(&room_id).cloned().expect("room should be resident")
}

async fn registered_in(state: &AppState, room_id: RoomId, name: &str) -> (ConnectionId, UserId) {
    let (connection, _rx) = test_helpers::connect(state).await;
    let user_id = register_user(state, connection, profile(name)).await.unwrap();
    join_room(state, connection, room_id).await.unwrap();
    (connection, user_id)
}

// =============================================================================
// registration
// =============================================================================

#[tokio::test]
async fn register_twice_is_rejected() {
    let state = test_helpers::test_app_state();
    let (connection, _rx) = test_helpers::connect(&state).await;

    let first = register_user(&state, connection, profile("ana")).await.unwrap();
    let err = register_user(&state, connection, profile("bob")).await.unwrap_err();

    assert!(matches!(err, RoomError::AlreadyRegistered));
    assert_eq!(err.error_code(), "E_ALREADY_REGISTERED");
    assert_eq!(state.users.read().await[&connection].id, first);
    assert_eq!(state.users.read().await[&connection].profile.username, "ana");
}

#[tokio::test]
async fn join_requires_registration() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 7).await;
    let (connection, _rx) = test_helpers::connect(&state).await;

    let err = join_room(&state, connection, 7).await.unwrap_err();
    assert!(matches!(err, RoomError::NotRegistered));
}

// =============================================================================
// join / exit
// =============================================================================

#[tokio::test]
async fn join_unknown_room_is_not_found() {
    let state = test_helpers::test_app_state();
    let (connection, _rx) = test_helpers::connect(&state).await;
    register_user(&state, connection, profile("ana")).await.unwrap();

    let err = join_room(&state, connection, 404).await.unwrap_err();
    assert!(matches!(err, RoomError::NotFound(404)));
    assert_eq!(err.error_code(), "E_NOT_FOUND");
    assert!(state.rooms.read().await.is_empty());
    assert!(state.users.read().await[&connection].room.is_none());
}

#[tokio::test]
async fn join_loads_room_from_store() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 7).await;

    let (connection, user_id) = registered_in(&state, 7, "ana").await;

    let room = resident(&state, 7).await;
    let room = room.lock().await;
    assert!(room.is_member(user_id));
    assert_eq!(room.objects().model_instances.len(), 1);
    assert_eq!(state.users.read().await[&connection].room.map(|v| v.room_id), Some(7));
}

#[tokio::test]
async fn switching_rooms_leaves_the_previous_one() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 1).await;
    test_helpers::seed_room(&state, 2).await;
    let (connection, user_id) = registered_in(&state, 1, "ana").await;

    join_room(&state, connection, 2).await.unwrap();

    let first = resident(&state, 1).await;
    let mut first = first.lock().await;
    let tick = first.tick();
    assert!(tick.update.user_updates.iter().any(|u| u.id == user_id && u.deleted));
    assert!(!first.is_member(user_id));
    assert!(resident(&state, 2).await.lock().await.is_member(user_id));
}

#[tokio::test]
async fn rejoining_same_room_survives_the_stale_removal() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 3).await;
    let (connection, user_id) = registered_in(&state, 3, "ana").await;

    join_room(&state, connection, 3).await.unwrap();

    let room = resident(&state, 3).await;
    let mut room = room.lock().await;
    room.tick();
    assert!(room.is_member(user_id));
}

#[tokio::test]
async fn exit_without_room_is_ok() {
    let state = test_helpers::test_app_state();
    let (connection, _rx) = test_helpers::connect(&state).await;
    register_user(&state, connection, profile("ana")).await.unwrap();

    exit_room(&state, connection).await.unwrap();
}

#[tokio::test]
async fn exit_detaches_and_blocks_room_requests() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 4).await;
    let (connection, user_id) = registered_in(&state, 4, "ana").await;

    exit_room(&state, connection).await.unwrap();

    let err = fetch_room_objects(&state, connection).await.unwrap_err();
    assert!(matches!(err, RoomError::NotMember));
    let room = resident(&state, 4).await;
    let mut room = room.lock().await;
    room.tick();
    assert!(!room.is_member(user_id));
    assert!(room.is_idle());
}

#[tokio::test]
async fn disconnect_forgets_user_and_queues_departure() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 5).await;
    let (connection, user_id) = registered_in(&state, 5, "ana").await;

    disconnect(&state, connection).await;

    assert!(!state.users.read().await.contains_key(&connection));
    let room = resident(&state, 5).await;
    let mut room = room.lock().await;
    assert_eq!(room.pending_len(), 1);
    room.tick();
    assert!(!room.is_member(user_id));
}

#[tokio::test]
async fn disconnect_outside_any_room_enqueues_nothing() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 6).await;
    let (inside, _) = registered_in(&state, 6, "ana").await;
    let (outside, _rx) = test_helpers::connect(&state).await;
    register_user(&state, outside, profile("bob")).await.unwrap();
    let room = resident(&state, 6).await;
    room.lock().await.tick();

    disconnect(&state, outside).await;

    assert!(!state.users.read().await.contains_key(&outside));
    assert!(state.users.read().await.contains_key(&inside));
    assert_eq!(room.lock().await.pending_len(), 0);
}

// =============================================================================
// room creation
// =============================================================================

#[tokio::test]
async fn create_room_requires_known_base_scene() {
    let state = test_helpers::test_app_state();

    let err = create_empty_room(&state, "Hangar", "scan-missing", "ops").await.unwrap_err();

    assert!(matches!(err, RoomError::BaseSceneNotFound(_)));
    assert_eq!(err.error_code(), "E_PRECONDITION_FAILED");
    assert!(fetch_previews(&state).await.unwrap().is_empty());
}

#[tokio::test]
async fn create_room_persists_and_notifies_registered_users() {
    let state = test_helpers::test_app_state();
    state.store.register_model_version("scan-1", "v1").await.unwrap();
    let (registered, mut rx) = test_helpers::connect(&state).await;
    register_user(&state, registered, profile("ana")).await.unwrap();
    let (_anonymous, mut rx_anonymous) = test_helpers::connect(&state).await;

    let room_id = create_empty_room(&state, "Hangar", "scan-1", "ops").await.unwrap();

    assert!((1..=state.config.max_room_id).contains(&room_id));
    let snapshot = state.store.load_room(room_id).await.unwrap().expect("room saved");
    assert_eq!(snapshot.meta.name, "Hangar");
    assert_eq!(snapshot.models.len(), 1);
    assert_eq!(snapshot.models[0].model_id, AssetRef::live("scan-1"));
    assert!(!snapshot.models[0].editable);

    assert_eq!(test_helpers::recv_frame(&mut rx).await.code, push::ROOM_PREVIEWS_CHANGED);
    test_helpers::assert_no_frame(&mut rx_anonymous).await;
}

#[tokio::test]
async fn create_room_fails_when_id_space_is_taken() {
    let config = ServerConfig { max_room_id: 1, room_id_attempts: 4, ..ServerConfig::default() };
    let state = AppState::new(config, Arc::new(MemoryRoomStore::new()));
    state.store.register_model_version("scan-1", "v1").await.unwrap();
    test_helpers::seed_room(&state, 1).await;

    let err = create_empty_room(&state, "Full", "scan-1", "").await.unwrap_err();

    assert!(matches!(err, RoomError::NoFreeRoomId(4)));
    assert!(err.retryable());
}

// =============================================================================
// mutations
// =============================================================================

#[tokio::test]
async fn mutations_require_a_room() {
    let state = test_helpers::test_app_state();
    let (connection, _rx) = test_helpers::connect(&state).await;
    register_user(&state, connection, profile("ana")).await.unwrap();

    let err = create_entity(&state, connection, EntityPayload::Model(crate_model())).await.unwrap_err();
    assert!(matches!(err, RoomError::NotMember));
    assert_eq!(err.error_code(), "E_NOT_MEMBER");
}

#[tokio::test]
async fn created_entity_appears_after_tick() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 8).await;
    let (connection, _) = registered_in(&state, 8, "ana").await;

    create_entity(&state, connection, EntityPayload::Model(crate_model())).await.unwrap();

    let room = resident(&state, 8).await;
    let mut room = room.lock().await;
    let tick = room.tick();
    assert_eq!(tick.update.model_updates.len(), 1);
    assert_eq!(tick.update.model_updates[0].id, 2);
}

#[tokio::test]
async fn batch_update_queues_models_markers_and_transform() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 9).await;
    let (connection, user_id) = registered_in(&state, 9, "ana").await;

    let body = BatchUpdateBody {
        model_states: vec![ModelTransformUpdate {
            id: 1,
            parent_id: None,
            position: [4.0, 0.0, 0.0],
            rotation: [0.0; 3],
            scale: [1.0; 3],
            mark_delete: false,
        }],
        marker_states: vec![MarkerChange { marker_info: marker(), action: EntityAction::Create }],
        user_position: Some([0.0, 1.7, 0.0]),
        user_rotation: Some([0.0, 45.0, 0.0]),
    };
    batch_update(&state, connection, body).await.unwrap();

    let room = resident(&state, 9).await;
    let mut room = room.lock().await;
    assert_eq!(room.pending_len(), 3);
    let tick = room.tick();
    assert_eq!(tick.update.model_updates[0].position, [4.0, 0.0, 0.0]);
    assert_eq!(tick.update.marker_updates.len(), 1);
    let me = tick.update.user_updates.iter().find(|u| u.id == user_id).unwrap();
    assert_eq!(me.position, [0.0, 1.7, 0.0]);
}

#[tokio::test]
async fn marker_update_checks_named_room() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 10).await;
    test_helpers::seed_room(&state, 11).await;
    let (connection, _) = registered_in(&state, 10, "ana").await;
    let (_, _) = registered_in(&state, 11, "bob").await;

    let err = update_marker_in(&state, connection, 99, EntityAction::Create, marker()).await.unwrap_err();
    assert!(matches!(err, RoomError::NotFound(99)));

    let err = update_marker_in(&state, connection, 11, EntityAction::Create, marker()).await.unwrap_err();
    assert!(matches!(err, RoomError::NotMember));

    update_marker_in(&state, connection, 10, EntityAction::Create, marker()).await.unwrap();
    assert_eq!(resident(&state, 10).await.lock().await.pending_len(), 1);
}

// =============================================================================
// reconstruction callback
// =============================================================================

#[tokio::test]
async fn new_reconstruction_reaches_room_members_only() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 12).await;

    let (member, mut rx_member) = test_helpers::connect(&state).await;
    register_user(&state, member, profile("ana")).await.unwrap();
    join_room(&state, member, 12).await.unwrap();
    let (lobby, mut rx_lobby) = test_helpers::connect(&state).await;
    register_user(&state, lobby, profile("bob")).await.unwrap();

    let sent = notify_new_reconstruction(&state, "scan-9", "v3").await.unwrap();

    assert_eq!(sent, 1);
    let frame = test_helpers::recv_frame(&mut rx_member).await;
    assert_eq!(frame.code, push::NEW_RECONSTRUCTION);
    assert_eq!(frame.data["new_id"], "scan-9");
    test_helpers::assert_no_frame(&mut rx_lobby).await;
    assert!(state.store.base_scene_exists("scan-9").await.unwrap());
}
