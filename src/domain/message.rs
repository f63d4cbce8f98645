use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The message shape crossing the engine boundary and Redis. Carries at
/// least `channel` and `data`; `id` is assigned by the publisher if the
/// caller didn't set one, and `client_id` identifies the publishing
/// client when the transport layer wants it echoed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub channel: String,
    pub data: Value,
    #[serde(rename = "clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl QueuedMessage {
    #[must_use]
    pub fn new(channel: impl Into<String>, data: Value) -> Self {
        Self { id: Uuid::new_v4().to_string(), channel: channel.into(), data, client_id: None }
    }

    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Encodes to the JSON representation stored in Redis lists and sent
    /// over the pub/sub wire.
    ///
    /// # Errors
    /// Returns an error if serialization fails (it shouldn't, given this
    /// type's fields, but `serde_json::Value` can in principle contain
    /// non-finite floats that fail to serialize).
    pub fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }

    /// Decodes a message previously produced by [`Self::to_json`]. Callers
    /// should log and drop malformed entries rather than propagate the
    /// error, per the engine's "one bad message never interrupts the
    /// event loop" policy.
    ///
    /// # Errors
    /// Returns an error if `raw` is not valid JSON for this shape.
    pub fn from_json(raw: &str) -> crate::error::Result<Self> {
        serde_json::from_str(raw).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let msg = QueuedMessage::new("/chat/room1", serde_json::json!({"text": "hi"}))
            .with_client_id("client-1");
        let encoded = msg.to_json().expect("encode");
        let decoded = QueuedMessage::from_json(&encoded).expect("decode");
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.channel, "/chat/room1");
        assert_eq!(decoded.client_id.as_deref(), Some("client-1"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(QueuedMessage::from_json("not json").is_err());
    }

    #[test]
    fn client_id_is_camel_case_on_the_wire() {
        let msg = QueuedMessage::new("/chat/room1", serde_json::json!({"text": "hi"})).with_client_id("client-1");
        let encoded = msg.to_json().expect("encode");
        assert!(encoded.contains("\"clientId\":\"client-1\""));
        assert!(!encoded.contains("client_id"));
    }
}
