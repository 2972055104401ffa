use super::*;
use crate::frame::ErrorCode;
use crate::scene::room::Room;

#[tokio::test]
async fn memory_store_round_trips_snapshots() {
    let store = MemoryRoomStore::new();
    let snapshot = Room::with_base_scene(12, "Bridge", "scan-2", "ops").snapshot();

    assert!(store.load_room(12).await.unwrap().is_none());
    assert!(!store.room_exists(12).await.unwrap());

    store.save_room(&snapshot).await.unwrap();
    assert!(store.room_exists(12).await.unwrap());
    assert_eq!(store.load_room(12).await.unwrap(), Some(snapshot));
}

#[tokio::test]
async fn memory_store_save_replaces_document() {
    let store = MemoryRoomStore::new();
    let mut snapshot = Room::with_base_scene(3, "Old", "scan-2", "ops").snapshot();
    store.save_room(&snapshot).await.unwrap();

    snapshot.meta.name = "New".into();
    store.save_room(&snapshot).await.unwrap();

    let previews = store.list_previews().await.unwrap();
    assert_eq!(previews.len(), 1);
    assert_eq!(previews[0].name, "New");
}

#[tokio::test]
async fn memory_store_lists_newest_first() {
    let store = MemoryRoomStore::new();
    let mut older = Room::with_base_scene(1, "a", "s", "x").snapshot();
    older.meta.modified_at_ms = 10;
    let mut newer = Room::with_base_scene(2, "b", "s", "x").snapshot();
    newer.meta.modified_at_ms = 20;
    store.save_room(&older).await.unwrap();
    store.save_room(&newer).await.unwrap();

    let ids: Vec<_> = store.list_previews().await.unwrap().iter().map(|m| m.room_id).collect();
    assert_eq!(ids, vec![2, 1]);
}

#[tokio::test]
async fn base_scene_requires_a_registered_version() {
    let store = MemoryRoomStore::new();
    assert!(!store.base_scene_exists("scan-5").await.unwrap());

    store.register_model_version("scan-5", "v1").await.unwrap();
    store.register_model_version("scan-5", "v1").await.unwrap();
    assert!(store.base_scene_exists("scan-5").await.unwrap());
    assert!(!store.base_scene_exists("scan-6").await.unwrap());
}

#[test]
fn store_errors_are_coded() {
    let err = StoreError::Database(sqlx::Error::PoolTimedOut);
    assert_eq!(err.error_code(), "E_STORE");
    assert!(err.retryable());

    let bad = serde_json::from_str::<RoomSnapshot>("{}").unwrap_err();
    let err = StoreError::from(bad);
    assert_eq!(err.error_code(), "E_STORE_ENCODING");
    assert!(!err.retryable());
}
