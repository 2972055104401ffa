use super::*;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
#[error("room 7 not found")]
struct MissingRoom;

impl ErrorCode for MissingRoom {
    fn error_code(&self) -> &'static str {
        "E_NOT_FOUND"
    }
}

#[derive(Debug, thiserror::Error)]
#[error("store unavailable")]
struct StoreDown;

impl ErrorCode for StoreDown {
    fn error_code(&self) -> &'static str {
        "E_STORE"
    }

    fn retryable(&self) -> bool {
        true
    }
}

#[test]
fn parses_code_sequence_and_flat_payload() {
    let frame: Frame = serde_json::from_str(r#"{"_code":104,"_sequenceNumber":9,"room_id":7}"#).unwrap();
    assert_eq!(frame.code, 104);
    assert_eq!(frame.seq, Some(json!(9)));
    assert_eq!(frame.data.get("room_id"), Some(&json!(7)));
    assert!(!frame.data.contains_key("_code"));
}

#[test]
fn sequence_number_is_optional() {
    let frame: Frame = serde_json::from_str(r#"{"_code":101}"#).unwrap();
    assert!(frame.seq.is_none());
    assert!(frame.data.is_empty());

    let text = serde_json::to_string(&Frame::push(-5, Data::new())).unwrap();
    assert!(!text.contains("_sequenceNumber"));
}

#[test]
fn reply_echoes_sequence_and_sets_success() {
    let req = Frame::push(106, Data::new()).with_seq("abc");
    let reply = req.reply(Data::new()).with_data("user_id", 3);

    assert_eq!(reply.code, REPLY_CODE);
    assert_eq!(reply.seq, Some(json!("abc")));
    assert_eq!(reply.success(), Some(true));
    assert_eq!(reply.data.get("user_id"), Some(&json!(3)));
}

#[test]
fn fail_carries_reason_code_and_retryable() {
    let req = Frame::push(104, Data::new()).with_seq(12);
    let reply = req.fail(&MissingRoom);

    assert_eq!(reply.success(), Some(false));
    assert_eq!(reply.seq, Some(json!(12)));
    assert_eq!(reply.data.get(FRAME_REASON), Some(&json!("room 7 not found")));
    assert_eq!(reply.data.get(FRAME_CODE), Some(&json!("E_NOT_FOUND")));
    assert_eq!(reply.data.get(FRAME_RETRYABLE), Some(&json!(false)));

    let retry = req.fail(&StoreDown);
    assert_eq!(retry.data.get(FRAME_RETRYABLE), Some(&json!(true)));
}

#[test]
fn detached_error_has_no_sequence() {
    let frame = Frame::detached_error(&MissingRoom);
    assert_eq!(frame.code, REPLY_CODE);
    assert!(frame.seq.is_none());
    assert_eq!(frame.success(), Some(false));
}

#[test]
fn payload_deserializes_typed_body() {
    #[derive(serde::Deserialize)]
    struct Join {
        room_id: i64,
    }

    let frame: Frame = serde_json::from_str(r#"{"_code":104,"room_id":42}"#).unwrap();
    let join: Join = frame.payload().unwrap();
    assert_eq!(join.room_id, 42);

    let bad: Frame = serde_json::from_str(r#"{"_code":104,"room_id":"x"}"#).unwrap();
    assert!(bad.payload::<Join>().is_err());
}

#[test]
fn to_data_flattens_structs() {
    #[derive(serde::Serialize)]
    struct Push {
        new_id: String,
    }

    let data = to_data(&Push { new_id: "scan-1".into() }).unwrap();
    assert_eq!(data.get("new_id"), Some(&json!("scan-1")));
    assert!(to_data(&5).unwrap().is_empty());
}

#[test]
fn now_ms_is_positive() {
    assert!(now_ms() > 0);
}
