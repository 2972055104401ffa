use super::*;
use crate::protocol::push;
use crate::scene::user::UserProfile;
use crate::state::test_helpers;

#[tokio::test]
async fn list_rooms_returns_persisted_previews() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 21).await;

    let Json(list) = list_rooms(State(state)).await.unwrap();

    assert_eq!(list.room_previews.len(), 1);
    assert_eq!(list.room_previews[0].room_id, 21);
}

#[tokio::test]
async fn reconstruction_ready_registers_version_and_notifies_members() {
    let state = test_helpers::test_app_state();
    test_helpers::seed_room(&state, 22).await;
    let (connection, mut rx) = test_helpers::connect(&state).await;
    editing::register_user(&state, connection, UserProfile::default()).await.unwrap();
    editing::join_room(&state, connection, 22).await.unwrap();

    let Json(ack) = reconstruction_ready(State(state.clone()), Path(("scan-5".into(), "v2".into())))
        .await
        .unwrap();

    assert_eq!(ack.notified, 1);
    assert!(state.store.base_scene_exists("scan-5").await.unwrap());
    let frame = test_helpers::recv_frame(&mut rx).await;
    assert_eq!(frame.code, push::NEW_RECONSTRUCTION);
    assert_eq!(frame.data["new_id"], "scan-5");
}

#[tokio::test]
async fn reconstruction_ready_rejects_blank_ids() {
    let state = test_helpers::test_app_state();
    let err = reconstruction_ready(State(state), Path((" ".into(), "v1".into())))
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::BAD_REQUEST);
}
