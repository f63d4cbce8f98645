use crate::adapters::redis::scripts::{batch_enqueue_script, enqueue_script};
use crate::adapters::redis::{ConnectionPool, Keys};
use crate::domain::QueuedMessage;
use crate::error::Result;
use std::time::Duration;

/// Per-client FIFO of undelivered messages, TTL'd on first enqueue into an
/// empty queue (spec §4.4). Ordering is guaranteed per-key by `RPUSH`;
/// nothing is promised across different clients' queues.
#[derive(Debug)]
pub struct MessageQueue {
    pool: ConnectionPool,
    keys: Keys,
    message_ttl: Duration,
}

impl MessageQueue {
    #[must_use]
    pub fn new(pool: ConnectionPool, keys: Keys, message_ttl: Duration) -> Self {
        Self { pool, keys, message_ttl }
    }

    /// Encodes `msg` to JSON and atomically `RPUSH`es it, applying
    /// `message_ttl` only if the list currently has none.
    ///
    /// # Errors
    /// Returns an error if encoding or the underlying script fails.
    pub async fn enqueue(&self, cid: &str, msg: &QueuedMessage) -> Result<bool> {
        let payload = msg.to_json()?;
        let queue_key = self.keys.messages(cid);
        let ttl = self.message_ttl.as_secs();

        self.pool
            .with_connection(move |mut conn| {
                let script = enqueue_script();
                let queue_key = queue_key.clone();
                let payload = payload.clone();
                async move { script.key(queue_key).arg(payload).arg(ttl).invoke_async::<i64>(&mut conn).await }
            })
            .await?;
        Ok(true)
    }

    /// Enqueues `msg` for every client in `cids` in one pipelined round
    /// trip: the whole batch succeeds or fails together, so a publish's
    /// fan-out enqueue never leaves some recipients with the message and
    /// others without it because of a single dropped connection.
    ///
    /// # Errors
    /// Returns an error if encoding or the underlying script fails.
    pub async fn enqueue_many(&self, cids: &[String], msg: &QueuedMessage) -> Result<bool> {
        if cids.is_empty() {
            return Ok(true);
        }
        let payload = msg.to_json()?;
        let queue_keys: Vec<String> = cids.iter().map(|cid| self.keys.messages(cid)).collect();
        let ttl = self.message_ttl.as_secs();

        self.pool
            .with_connection(move |mut conn| {
                let script = batch_enqueue_script();
                let queue_keys = queue_keys.clone();
                let payload = payload.clone();
                async move {
                    let mut invocation = script.prepare_invoke();
                    for key in &queue_keys {
                        invocation.key(key);
                    }
                    invocation.arg(&payload).arg(ttl).invoke_async::<i64>(&mut conn).await
                }
            })
            .await?;
        Ok(true)
    }

    /// Atomically `LRANGE 0..-1` then `DEL` in one transaction. Malformed
    /// entries are logged and dropped; surrounding messages are unaffected.
    ///
    /// # Errors
    /// Returns an error if the underlying transaction fails.
    pub async fn dequeue_all(&self, cid: &str) -> Result<Vec<QueuedMessage>> {
        let queue_key = self.keys.messages(cid);
        let (raw,): (Vec<String>,) = self
            .pool
            .with_connection(move |mut conn| {
                let queue_key = queue_key.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    pipe.lrange(&queue_key, 0, -1);
                    pipe.del(&queue_key);
                    pipe.query_async::<(Vec<String>, i64)>(&mut conn).await.map(|(items, _)| (items,))
                }
            })
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|entry| match QueuedMessage::from_json(&entry) {
                Ok(msg) => Some(msg),
                Err(err) => {
                    tracing::warn!(error = %err, "dropping malformed queued message");
                    None
                }
            })
            .collect())
    }

    /// First `limit` messages without removal. Malformed entries are
    /// dropped rather than propagated.
    ///
    /// # Errors
    /// Returns an error if the underlying command fails.
    pub async fn peek(&self, cid: &str, limit: isize) -> Result<Vec<QueuedMessage>> {
        let queue_key = self.keys.messages(cid);
        let raw: Vec<String> = self
            .pool
            .with_connection(move |mut conn| {
                let queue_key = queue_key.clone();
                async move { redis::cmd("LRANGE").arg(&queue_key).arg(0).arg(limit.saturating_sub(1)).query_async(&mut conn).await }
            })
            .await?;

        Ok(raw
            .into_iter()
            .filter_map(|entry| match QueuedMessage::from_json(&entry) {
                Ok(msg) => Some(msg),
                Err(err) => {
                    tracing::warn!(error = %err, "dropping malformed queued message");
                    None
                }
            })
            .collect())
    }

    /// # Errors
    /// Returns an error if the underlying command fails.
    pub async fn size(&self, cid: &str) -> Result<u64> {
        let queue_key = self.keys.messages(cid);
        self.pool
            .with_connection(move |mut conn| {
                let queue_key = queue_key.clone();
                async move { redis::cmd("LLEN").arg(&queue_key).query_async(&mut conn).await }
            })
            .await
    }

    /// # Errors
    /// Returns an error if the underlying command fails.
    pub async fn clear(&self, cid: &str) -> Result<()> {
        let queue_key = self.keys.messages(cid);
        self.pool
            .with_connection(move |mut conn| {
                let queue_key = queue_key.clone();
                async move { redis::cmd("DEL").arg(&queue_key).query_async(&mut conn).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_entries_are_dropped_not_propagated() {
        let good = QueuedMessage::new("/a", serde_json::json!({"x": 1})).to_json().expect("encode");
        let raw = vec![good, "not json".to_string()];
        let decoded: Vec<QueuedMessage> = raw.into_iter().filter_map(|entry| QueuedMessage::from_json(&entry).ok()).collect();
        assert_eq!(decoded.len(), 1);
    }
}
