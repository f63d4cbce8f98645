use serde::{Deserialize, Serialize};

/// The Hash-backed client session record (`{ns}:clients:{cid}`). Exists
/// iff the owning client has pinged within `client_timeout`; the Hash's
/// own TTL is what actually expires it; this struct is just the decoded
/// view of its fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientRecord {
    pub client_id: String,
    pub created_at: i64,
    pub last_ping: i64,
    pub server_id: String,
}

impl ClientRecord {
    #[must_use]
    pub fn new(client_id: impl Into<String>, server_id: impl Into<String>, now: i64) -> Self {
        Self { client_id: client_id.into(), created_at: now, last_ping: now, server_id: server_id.into() }
    }

    /// Builds the field/value pairs for an `HSET`, in the order the
    /// registry's transactions expect them.
    #[must_use]
    pub fn as_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("client_id", self.client_id.clone()),
            ("created_at", self.created_at.to_string()),
            ("last_ping", self.last_ping.to_string()),
            ("server_id", self.server_id.clone()),
        ]
    }

    /// Reconstructs a record from a flat `HGETALL` field/value list.
    #[must_use]
    pub fn from_fields(fields: &std::collections::HashMap<String, String>) -> Option<Self> {
        Some(Self {
            client_id: fields.get("client_id")?.clone(),
            created_at: fields.get("created_at")?.parse().ok()?,
            last_ping: fields.get("last_ping")?.parse().ok()?,
            server_id: fields.get("server_id")?.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_fields() {
        let record = ClientRecord::new("c1", "server-a", 1_000);
        let map: std::collections::HashMap<String, String> =
            record.as_fields().into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        let decoded = ClientRecord::from_fields(&map).expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn rejects_incomplete_fields() {
        let map = std::collections::HashMap::new();
        assert!(ClientRecord::from_fields(&map).is_none());
    }
}
