//! Shared data types and field names.
//!
//! Event payloads are open attribute maps. `serde_json::Map` is backed by a
//! `BTreeMap`, so iteration over attributes is always in key order.

use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Event payload: attribute name → value.
pub type EventData = Map<String, Value>;

/// Field stamped onto every delivered payload that lacks one (ms since epoch).
pub const TIMESTAMP_FIELD: &str = "ts";

/// Default global attribute carrying the session tracking id.
pub const TRACKID_ATTRIBUTE: &str = "trackid";

/// Current wall-clock time in milliseconds since the UNIX epoch.
#[inline]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A queued (event name, payload) pair.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingEvent {
    pub name: String,
    pub data: EventData,
}

impl PendingEvent {
    pub fn new(name: impl Into<String>, data: EventData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}
