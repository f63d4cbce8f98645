use crate::adapters::redis::{ConnectionPool, Keys};
use crate::domain::ClientRecord;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Every tenth `cleanup_expired` call triggers a full index rebuild from
/// a `SCAN` of `clients:{*}`, catching ids that slipped past per-cycle
/// reconciliation (e.g. the index add succeeded but a crash left no Hash).
const INDEX_REPAIR_PERIOD: u32 = 10;
const SCAN_COUNT: usize = 200;

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Lifecycle, heartbeat, and index of active client sessions (spec §4.2).
#[derive(Debug)]
pub struct ClientRegistry {
    pool: ConnectionPool,
    keys: Keys,
    client_timeout: Duration,
    cleanup_cycles: AtomicU32,
}

impl ClientRegistry {
    #[must_use]
    pub fn new(pool: ConnectionPool, keys: Keys, client_timeout: Duration) -> Self {
        Self { pool, keys, client_timeout, cleanup_cycles: AtomicU32::new(0) }
    }

    /// Writes the Hash, adds to the index, and applies the client-timeout
    /// TTL, atomically.
    ///
    /// # Errors
    /// Returns an error if the underlying transaction fails.
    pub async fn create(&self, cid: &str, server_id: &str) -> Result<bool> {
        let record = ClientRecord::new(cid, server_id, now_epoch_secs());
        let client_key = self.keys.client(cid);
        let index_key = self.keys.client_index();
        let ttl = self.client_timeout.as_secs();

        self.pool
            .with_connection(|mut conn| {
                let client_key = client_key.clone();
                let index_key = index_key.clone();
                let fields = record.as_fields();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    for (field, value) in &fields {
                        pipe.hset(&client_key, *field, value);
                    }
                    pipe.sadd(&index_key, cid);
                    pipe.expire(&client_key, ttl as i64);
                    pipe.query_async::<()>(&mut conn).await
                }
            })
            .await?;
        Ok(true)
    }

    /// Removes the Hash and the index membership atomically.
    ///
    /// # Errors
    /// Returns an error if the underlying transaction fails.
    pub async fn destroy(&self, cid: &str) -> Result<bool> {
        let client_key = self.keys.client(cid);
        let index_key = self.keys.client_index();

        let (deleted, removed): (i64, i64) = self
            .pool
            .with_connection(|mut conn| {
                let client_key = client_key.clone();
                let index_key = index_key.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    pipe.del(&client_key);
                    pipe.srem(&index_key, cid);
                    pipe.query_async(&mut conn).await
                }
            })
            .await?;
        Ok(deleted > 0 || removed > 0)
    }

    /// True iff the client's Hash exists.
    ///
    /// # Errors
    /// Returns an error if the underlying command fails.
    pub async fn exists(&self, cid: &str) -> Result<bool> {
        let client_key = self.keys.client(cid);
        self.pool
            .with_connection(move |mut conn| {
                let client_key = client_key.clone();
                async move { redis::cmd("EXISTS").arg(&client_key).query_async::<i64>(&mut conn).await }
            })
            .await
            .map(|count| count > 0)
    }

    /// Refreshes `last_ping` and re-applies the client-timeout TTL.
    ///
    /// # Errors
    /// Returns an error if the underlying command fails.
    pub async fn ping(&self, cid: &str) -> Result<()> {
        let client_key = self.keys.client(cid);
        let ttl = self.client_timeout.as_secs();
        self.pool
            .with_connection(move |mut conn| {
                let client_key = client_key.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.hset(&client_key, "last_ping", now_epoch_secs());
                    pipe.expire(&client_key, ttl as i64);
                    pipe.query_async::<()>(&mut conn).await
                }
            })
            .await
    }

    /// # Errors
    /// Returns an error if the underlying command fails.
    pub async fn get(&self, cid: &str) -> Result<Option<ClientRecord>> {
        let client_key = self.keys.client(cid);
        let fields: HashMap<String, String> = self
            .pool
            .with_connection(move |mut conn| {
                let client_key = client_key.clone();
                async move { redis::cmd("HGETALL").arg(&client_key).query_async(&mut conn).await }
            })
            .await?;
        Ok(ClientRecord::from_fields(&fields))
    }

    /// Member ids from the index, possibly including ids whose Hash has
    /// since expired — callers that need liveness should also call
    /// `exists` or rely on `cleanup_expired`'s reconciliation.
    ///
    /// # Errors
    /// Returns an error if the underlying command fails.
    pub async fn all(&self) -> Result<Vec<String>> {
        let index_key = self.keys.client_index();
        self.pool
            .with_connection(move |mut conn| {
                let index_key = index_key.clone();
                async move { redis::cmd("SMEMBERS").arg(&index_key).query_async(&mut conn).await }
            })
            .await
    }

    /// For every id in the index, pipeline-checks the Hash's existence in
    /// one round trip and removes stale ids from the index. Every tenth
    /// call additionally rebuilds the index from a `SCAN` of `clients:{*}`.
    ///
    /// # Errors
    /// Returns an error if scanning or the reconciliation writes fail.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let ids = self.all().await?;
        let stale = if ids.is_empty() {
            Vec::new()
        } else {
            let client_keys: Vec<String> = ids.iter().map(|id| self.keys.client(id)).collect();
            let exists: Vec<i64> = self
                .pool
                .with_connection(move |mut conn| {
                    let client_keys = client_keys.clone();
                    async move {
                        let mut pipe = redis::pipe();
                        for key in &client_keys {
                            pipe.exists(key);
                        }
                        pipe.query_async(&mut conn).await
                    }
                })
                .await?;

            ids.into_iter().zip(exists).filter(|(_, exists)| *exists == 0).map(|(id, _)| id).collect()
        };

        let stale_count = stale.len() as u64;
        if !stale.is_empty() {
            let index_key = self.keys.client_index();
            let client_keys: Vec<String> = stale.iter().map(|id| self.keys.client(id)).collect();
            self.pool
                .with_connection(move |mut conn| {
                    let index_key = index_key.clone();
                    let stale = stale.clone();
                    let client_keys = client_keys.clone();
                    async move {
                        let mut pipe = redis::pipe();
                        pipe.atomic();
                        for id in &stale {
                            pipe.srem(&index_key, id);
                        }
                        for key in &client_keys {
                            pipe.del(key);
                        }
                        pipe.query_async::<()>(&mut conn).await
                    }
                })
                .await?;
        }

        let cycles = self.cleanup_cycles.fetch_add(1, Ordering::SeqCst) + 1;
        if cycles % INDEX_REPAIR_PERIOD == 0 {
            self.repair_index().await?;
            self.cleanup_cycles.store(0, Ordering::SeqCst);
        }

        Ok(stale_count)
    }

    /// Rebuilds the client index from a `SCAN` of `clients:{*}`, atomically
    /// replacing its contents. This is the backstop for the case where an
    /// index add succeeded but a crash left no Hash behind it, or vice
    /// versa (a Hash write landed with no corresponding index entry).
    async fn repair_index(&self) -> Result<()> {
        let scan_pattern = self.keys.client_scan_pattern();
        let index_key = self.keys.client_index();

        let mut found = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = self
                .pool
                .with_connection(|mut conn| {
                    let scan_pattern = scan_pattern.clone();
                    async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&scan_pattern)
                            .arg("COUNT")
                            .arg(SCAN_COUNT)
                            .query_async(&mut conn)
                            .await
                    }
                })
                .await?;

            for key in keys {
                if let Some(id) = self.keys.id_from_key(&key)
                    && id != "index"
                {
                    found.push(id.to_string());
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        self.pool
            .with_connection(move |mut conn| {
                let index_key = index_key.clone();
                let found = found.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    pipe.del(&index_key);
                    if !found.is_empty() {
                        pipe.sadd(&index_key, &found);
                    }
                    pipe.query_async::<()>(&mut conn).await
                }
            })
            .await
    }
}
