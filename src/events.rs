//! Events pushed to live streaming connections.
//!
//! Producers elsewhere in the application hand a [`StreamEvent`] to the
//! [`EventBroadcaster`](crate::stream::EventBroadcaster). The payload is an
//! arbitrary JSON object; the broadcaster never inspects it beyond picking an
//! SSE event name.
//!
//! # Example
//!
//! ```rust
//! use study_relay::events::StreamEvent;
//! use serde_json::json;
//!
//! let event = StreamEvent::new(json!({ "type": "update", "value": 1 }));
//! assert_eq!(event.kind(), "update");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// SSE event name used when the payload carries no usable `type`.
pub const DEFAULT_EVENT_KIND: &str = "message";

/// A single event delivered to streaming clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamEvent(Value);

impl StreamEvent {
    #[must_use]
    pub fn new(payload: Value) -> Self {
        Self(payload)
    }

    /// Event sent first on every new connection, carrying its registry id.
    #[must_use]
    pub fn connected(client_id: &str) -> Self {
        Self(serde_json::json!({ "type": "connected", "clientId": client_id }))
    }

    /// The SSE event name: the payload's `type` field when it is a
    /// single-line string, otherwise [`DEFAULT_EVENT_KIND`].
    #[must_use]
    pub fn kind(&self) -> &str {
        match self.0.get("type").and_then(Value::as_str) {
            Some(kind) if !kind.is_empty() && !kind.contains(['\n', '\r']) => kind,
            _ => DEFAULT_EVENT_KIND,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.0
    }

    /// Serialized payload for the SSE `data:` field.
    #[must_use]
    pub fn to_json(&self) -> String {
        self.0.to_string()
    }
}

impl From<Value> for StreamEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
