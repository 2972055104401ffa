use super::*;
use crate::scene::entity::Lifecycle;
use crate::scene::room::Room;
use crate::scene::user::{ConnectionId, User, UserProfile};

fn user(id: UserId) -> User {
    User::new(id, &UserProfile::default(), ConnectionId::new(), 1)
}

fn annotation(target_id: EntityId) -> Annotation {
    Annotation {
        id: 0,
        target_kind: 1,
        target_id,
        title: "Crack".into(),
        description: "Hairline crack on the east beam".into(),
        auditor: "kim".into(),
        safety_check_passed: false,
        lifecycle: Lifecycle::default(),
    }
}

fn session() -> CaptureSession {
    CaptureSession::new(5, user(1), "scan-1", "v1")
}

#[test]
fn annotation_update_overwrites_fields() {
    let mut room = Room::with_base_scene(1, "r", "scan-1", "a");
    RoomAction::Create(EntityPayload::Annotation(annotation(1))).invoke(&mut room);

    let mut edited = annotation(1);
    edited.id = 1;
    edited.safety_check_passed = true;
    RoomAction::Modify { action: EntityAction::Update, payload: EntityPayload::Annotation(edited) }.invoke(&mut room);

    let stored = room.annotations.get(1).unwrap();
    assert!(stored.safety_check_passed);
    assert!(stored.lifecycle.dirty);
}

#[test]
fn measurement_delete_stages_removal() {
    let mut room = Room::with_base_scene(1, "r", "scan-1", "a");
    let m = Measurement { id: 0, start: [0.0; 3], end: [1.0, 0.0, 0.0], distance: 0.0, lifecycle: Lifecycle::default() };
    RoomAction::Create(EntityPayload::Measurement(m.clone())).invoke(&mut room);

    let mut target = m;
    target.id = 1;
    RoomAction::Modify { action: EntityAction::Delete, payload: EntityPayload::Measurement(target) }.invoke(&mut room);
    assert_eq!(room.measurements.pending_deletes(), &[1]);
}

#[test]
fn transform_for_departed_user_is_ignored() {
    let mut room = Room::with_base_scene(1, "r", "scan-1", "a");
    room.add_user(user(4));
    RoomAction::RemoveUser { user_id: 4, membership: 1 }.invoke(&mut room);
    RoomAction::UpdateUserTransform { user_id: 4, position: [5.0; 3], rotation: [5.0; 3] }.invoke(&mut room);

    assert_eq!(room.users[&4].position, [0.0; 3]);
}

#[test]
fn model_version_update_raises_notification() {
    let mut s = session();
    SessionAction::UpdateModelVersion { model_id: "scan-1".into(), version: "v2".into() }.invoke(&mut s);
    assert_eq!(s.version, "v2");

    let out = s.tick().unwrap();
    assert_eq!(out.host.1.events, vec![Notification::UpdatedModelVersion]);
}

#[test]
fn session_transform_targets_host_or_viewer() {
    let mut s = session();
    s.add_viewer(user(2));
    SessionAction::UserTransform { user_id: 1, position: [1.0; 3], rotation: [0.0; 3] }.invoke(&mut s);
    SessionAction::UserTransform { user_id: 2, position: [2.0; 3], rotation: [0.0; 3] }.invoke(&mut s);
    SessionAction::UserTransform { user_id: 3, position: [3.0; 3], rotation: [0.0; 3] }.invoke(&mut s);

    assert_eq!(s.host.position, [1.0; 3]);
    assert_eq!(s.viewers[&2].position, [2.0; 3]);
}

#[test]
fn logout_of_unknown_viewer_raises_nothing() {
    let mut s = session();
    SessionAction::Logout { user_id: 9 }.invoke(&mut s);
    assert!(s.tick().unwrap().host.1.events.is_empty());
}

#[test]
fn only_successful_marker_create_raises_created_marker() {
    let mut s = session();
    let marker = Marker {
        id: 3,
        position: [0.0; 3],
        normal: [0.0, 1.0, 0.0],
        marker_type: 2,
        visibility: true,
        lifecycle: Lifecycle::default(),
    };
    SessionAction::Marker { action: EntityAction::Update, marker: marker.clone() }.invoke(&mut s);
    assert!(s.tick().unwrap().host.1.events.is_empty());

    SessionAction::Marker { action: EntityAction::Create, marker }.invoke(&mut s);
    let out = s.tick().unwrap();
    assert_eq!(out.host.1.events, vec![Notification::CreatedMarker]);
    assert_eq!(out.host.1.marker_infos[0].id, 1);
}
