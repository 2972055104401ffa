//! Frame: the universal message type for the edge server.
//!
//! ARCHITECTURE
//! ============
//! Every websocket message is a JSON object with an integer `_code` and a
//! flat payload. Clients send request frames with positive codes, the server
//! answers each with a reply frame (`_code: 0`) that echoes the optional
//! `_sequenceNumber`, and pushes state on its own initiative with negative
//! codes.
//!
//! DESIGN
//! ======
//! - Flat data: the payload lives beside `_code` on the top level object.
//! - Replies correlate to requests via the echoed sequence number only.
//! - Every reply carries `success` as a real JSON boolean.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// FIELD CONSTANTS
// =============================================================================

/// Operation code carried by every reply frame.
pub const REPLY_CODE: i32 = 0;

/// Frame data key for the boolean outcome on replies.
pub const FRAME_SUCCESS: &str = "success";

/// Frame data key for human readable failure reasons.
pub const FRAME_REASON: &str = "reason";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on failed replies.
pub const FRAME_RETRYABLE: &str = "retryable";

// =============================================================================
// TYPES
// =============================================================================

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, Value>;

/// The universal message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "_code")]
    pub code: i32,
    /// Opaque client correlation token, echoed back verbatim.
    #[serde(rename = "_sequenceNumber", default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<Value>,
    #[serde(flatten)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured failure replies.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// Serialize any payload struct into flat frame data.
///
/// Non-object values produce an empty payload.
pub fn to_data<T: Serialize>(value: &T) -> Result<Data, serde_json::Error> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Ok(Data::new()),
    }
}

impl Frame {
    /// Create a server push frame.
    #[must_use]
    pub fn push(code: i32, data: Data) -> Self {
        Self { code, seq: None, data }
    }

    /// Create a reply that is not tied to any parsed request, e.g. when the
    /// inbound text was not valid JSON.
    #[must_use]
    pub fn detached_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::push(REPLY_CODE, Data::new()).fail_with(err)
    }

    /// Successful reply carrying `data`. Echoes the sequence number.
    #[must_use]
    pub fn reply(&self, mut data: Data) -> Self {
        data.insert(FRAME_SUCCESS.into(), Value::Bool(true));
        Self { code: REPLY_CODE, seq: self.seq.clone(), data }
    }

    /// Successful reply with no payload beyond `success`.
    #[must_use]
    pub fn ok(&self) -> Self {
        self.reply(Data::new())
    }

    /// Structured failure reply from a typed error.
    #[must_use]
    pub fn fail(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { code: REPLY_CODE, seq: self.seq.clone(), data: Data::new() }.fail_with(err)
    }

    fn fail_with(mut self, err: &(impl ErrorCode + ?Sized)) -> Self {
        self.data.insert(FRAME_SUCCESS.into(), Value::Bool(false));
        self.data.insert(FRAME_REASON.into(), Value::String(err.to_string()));
        self.data.insert(FRAME_CODE.into(), Value::String(err.error_code().to_owned()));
        self.data.insert(FRAME_RETRYABLE.into(), Value::Bool(err.retryable()));
        self
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    #[cfg(test)]
    pub fn with_seq(mut self, seq: impl Into<Value>) -> Self {
        self.seq = Some(seq.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// PAYLOAD ACCESS
// =============================================================================

impl Frame {
    /// Deserialize the flat payload into a typed request body.
    ///
    /// # Errors
    ///
    /// Returns the serde error if required fields are missing or mistyped.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        let map: serde_json::Map<String, Value> = self.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(Value::Object(map))
    }

    /// Convenience accessor for the `success` flag on replies.
    #[must_use]
    pub fn success(&self) -> Option<bool> {
        self.data.get(FRAME_SUCCESS).and_then(Value::as_bool)
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
