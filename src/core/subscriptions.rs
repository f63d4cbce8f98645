use crate::adapters::redis::scripts::subscribe_script;
use crate::adapters::redis::{ConnectionPool, Keys};
use crate::error::Result;
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;

const SCAN_COUNT: usize = 200;

fn now_epoch_secs() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn is_pattern(channel: &str) -> bool {
    channel.contains('*')
}

/// Rewrites `pattern` into an anchored regex. A lone `*` becomes `[^/]+`
/// wherever it appears. A `**` becomes `.*` only when it sits on a
/// segment boundary (preceded and followed by `/` or the string's edge);
/// a `**` that doesn't — e.g. `/foo**bar/*` — is left for per-character
/// literal escaping instead, so it can only ever match a channel name
/// that itself contains a literal `*`, i.e. effectively never.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut rewritten = String::with_capacity(pattern.len() * 2);
    rewritten.push('^');

    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '*' {
            let is_double = chars.get(i + 1) == Some(&'*');
            if is_double {
                let before_ok = i == 0 || chars[i - 1] == '/';
                let after_ok = i + 2 == chars.len() || chars[i + 2] == '/';
                if before_ok && after_ok {
                    rewritten.push_str(".*");
                    i += 2;
                    continue;
                }
            }
            rewritten.push_str("[^/]+");
            i += 1;
        } else {
            rewritten.push_str(&regex::escape(&chars[i].to_string()));
            i += 1;
        }
    }
    rewritten.push('$');
    Regex::new(&rewritten).ok()
}

/// Client↔channel bipartite graph, the wildcard pattern set, and a
/// per-instance compiled-pattern cache (spec §4.3).
#[derive(Debug)]
pub struct SubscriptionManager {
    pool: ConnectionPool,
    keys: Keys,
    subscription_ttl: Duration,
    cleanup_batch_size: usize,
    pattern_cache: DashMap<String, Option<Regex>>,
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(pool: ConnectionPool, keys: Keys, subscription_ttl: Duration, cleanup_batch_size: usize) -> Self {
        Self { pool, keys, subscription_ttl, cleanup_batch_size: cleanup_batch_size.clamp(1, 1000), pattern_cache: DashMap::new() }
    }

    /// Atomically writes both sides of the bipartite graph, the meta hash,
    /// and (for wildcard channels) the pattern set membership, applying
    /// `subscription_ttl` to each touched key only if it had none.
    ///
    /// # Errors
    /// Returns an error if the underlying script invocation fails.
    pub async fn subscribe(&self, cid: &str, channel: &str) -> Result<bool> {
        let subs_key = self.keys.subscriptions(cid);
        let chan_key = self.keys.channel(channel);
        let meta_key = self.keys.subscription_meta(cid, channel);
        let patterns_key = self.keys.patterns();
        let pattern_flag = if is_pattern(channel) { "1" } else { "0" };
        let ttl = self.subscription_ttl.as_secs();
        let subscribed_at = now_epoch_secs();

        self.pool
            .with_connection(move |mut conn| {
                let script = subscribe_script();
                let subs_key = subs_key.clone();
                let chan_key = chan_key.clone();
                let meta_key = meta_key.clone();
                let patterns_key = patterns_key.clone();
                async move {
                    script
                        .key(subs_key)
                        .key(chan_key)
                        .key(meta_key)
                        .key(patterns_key)
                        .arg(channel)
                        .arg(cid)
                        .arg(pattern_flag)
                        .arg(subscribed_at)
                        .arg(ttl)
                        .invoke_async::<i64>(&mut conn)
                        .await
                }
            })
            .await?;
        Ok(true)
    }

    /// Removes both sides of the bipartite graph and the meta hash. If
    /// `channel` is a wildcard and its subscriber set is now empty, also
    /// removes it from the pattern set and evicts the compiled-pattern
    /// cache entry.
    ///
    /// # Errors
    /// Returns an error if the underlying commands fail.
    pub async fn unsubscribe(&self, cid: &str, channel: &str) -> Result<bool> {
        let subs_key = self.keys.subscriptions(cid);
        let chan_key = self.keys.channel(channel);
        let meta_key = self.keys.subscription_meta(cid, channel);

        let (removed_from_subs, remaining): (i64, i64) = self
            .pool
            .with_connection(move |mut conn| {
                let subs_key = subs_key.clone();
                let chan_key = chan_key.clone();
                let meta_key = meta_key.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    pipe.srem(&subs_key, channel);
                    pipe.srem(&chan_key, cid);
                    pipe.del(&meta_key);
                    pipe.scard(&chan_key);
                    pipe.query_async::<(i64, i64, i64, i64)>(&mut conn)
                        .await
                        .map(|(subs, _chan, _meta, card)| (subs, card))
                }
            })
            .await?;

        if is_pattern(channel) && remaining == 0 {
            self.evict_empty_pattern(channel).await?;
        }

        Ok(removed_from_subs > 0)
    }

    /// Removes `pattern` from the `patterns` set, deletes its now-empty
    /// subscriber set, and evicts the compiled-pattern cache entry. Safe
    /// to call when the pattern is already gone.
    async fn evict_empty_pattern(&self, pattern: &str) -> Result<()> {
        let patterns_key = self.keys.patterns();
        let chan_key = self.keys.channel(pattern);
        self.pool
            .with_connection(move |mut conn| {
                let patterns_key = patterns_key.clone();
                let chan_key = chan_key.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    pipe.srem(&patterns_key, pattern);
                    pipe.del(&chan_key);
                    pipe.query_async::<()>(&mut conn).await
                }
            })
            .await?;
        self.pattern_cache.remove(pattern);
        Ok(())
    }

    /// Unsubscribes `cid` from every channel it currently holds.
    ///
    /// # Errors
    /// Returns an error if any underlying unsubscribe fails.
    pub async fn unsubscribe_all(&self, cid: &str) -> Result<()> {
        for channel in self.get_client_subscriptions(cid).await? {
            self.unsubscribe(cid, &channel).await?;
        }
        Ok(())
    }

    /// # Errors
    /// Returns an error if the underlying command fails.
    pub async fn get_client_subscriptions(&self, cid: &str) -> Result<Vec<String>> {
        let subs_key = self.keys.subscriptions(cid);
        self.pool
            .with_connection(move |mut conn| {
                let subs_key = subs_key.clone();
                async move { redis::cmd("SMEMBERS").arg(&subs_key).query_async(&mut conn).await }
            })
            .await
    }

    /// Deduplicated union of exact subscribers (`channels:{ch}`) and
    /// pattern subscribers whose pattern matches `ch`.
    ///
    /// # Errors
    /// Returns an error if any underlying command fails.
    pub async fn get_subscribers(&self, channel: &str) -> Result<Vec<String>> {
        let chan_key = self.keys.channel(channel);
        let exact: Vec<String> = self
            .pool
            .with_connection(move |mut conn| {
                let chan_key = chan_key.clone();
                async move { redis::cmd("SMEMBERS").arg(&chan_key).query_async(&mut conn).await }
            })
            .await?;

        let mut set: HashSet<String> = exact.into_iter().collect();
        set.extend(self.get_pattern_subscribers(channel).await?);
        Ok(set.into_iter().collect())
    }

    /// Step 1: `SMEMBERS patterns`. Step 2: filter matches in-process.
    /// Step 3: pipeline `SMEMBERS channels:{pattern}` for every match in a
    /// single round trip. Flattened and deduplicated.
    ///
    /// # Errors
    /// Returns an error if any underlying command fails.
    pub async fn get_pattern_subscribers(&self, channel: &str) -> Result<Vec<String>> {
        let patterns_key = self.keys.patterns();
        let patterns: Vec<String> = self
            .pool
            .with_connection(move |mut conn| {
                let patterns_key = patterns_key.clone();
                async move { redis::cmd("SMEMBERS").arg(&patterns_key).query_async(&mut conn).await }
            })
            .await?;

        let matching: Vec<String> = patterns.into_iter().filter(|pattern| self.matches(channel, pattern)).collect();
        if matching.is_empty() {
            return Ok(Vec::new());
        }

        let chan_keys: Vec<String> = matching.iter().map(|pattern| self.keys.channel(pattern)).collect();
        let members: Vec<Vec<String>> = self
            .pool
            .with_connection(move |mut conn| {
                let chan_keys = chan_keys.clone();
                async move {
                    let mut pipe = redis::pipe();
                    for key in &chan_keys {
                        pipe.cmd("SMEMBERS").arg(key);
                    }
                    pipe.query_async(&mut conn).await
                }
            })
            .await?;

        let mut set: HashSet<String> = HashSet::new();
        set.extend(members.into_iter().flatten());
        Ok(set.into_iter().collect())
    }

    /// Compiles (and caches) `pattern`, then tests `channel` against it.
    /// An uncompilable pattern is cached as `None` and treated as
    /// non-matching; the compile failure is logged once, on first attempt.
    #[must_use]
    pub fn matches(&self, channel: &str, pattern: &str) -> bool {
        if let Some(entry) = self.pattern_cache.get(pattern) {
            return entry.as_ref().is_some_and(|regex| regex.is_match(channel));
        }

        let compiled = compile_pattern(pattern);
        if compiled.is_none() {
            tracing::warn!(pattern, "failed to compile subscription pattern, treating as non-matching");
        }
        let matched = compiled.as_ref().is_some_and(|regex| regex.is_match(channel));
        self.pattern_cache.insert(pattern.to_string(), compiled);
        matched
    }

    /// Unconditionally (active-client semantics) refreshes `subscription_ttl`
    /// on `subscriptions:{cid}` and every `channels:{ch}` /
    /// `subscription:{cid}:{ch}` the client currently holds.
    ///
    /// # Errors
    /// Returns an error if the underlying commands fail.
    pub async fn refresh_client_subscriptions_ttl(&self, cid: &str) -> Result<()> {
        let channels = self.get_client_subscriptions(cid).await?;
        if channels.is_empty() {
            return Ok(());
        }

        let subs_key = self.keys.subscriptions(cid);
        let ttl = self.subscription_ttl.as_secs() as i64;
        let chan_keys: Vec<String> = channels.iter().map(|ch| self.keys.channel(ch)).collect();
        let meta_keys: Vec<String> = channels.iter().map(|ch| self.keys.subscription_meta(cid, ch)).collect();

        self.pool
            .with_connection(move |mut conn| {
                let subs_key = subs_key.clone();
                let chan_keys = chan_keys.clone();
                let meta_keys = meta_keys.clone();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.expire(&subs_key, ttl);
                    for key in &chan_keys {
                        pipe.expire(key, ttl);
                    }
                    for key in &meta_keys {
                        pipe.expire(key, ttl);
                    }
                    pipe.query_async::<()>(&mut conn).await
                }
            })
            .await
    }

    /// Reconciles crash-orphaned subscription state against `active_cids`,
    /// in the five SCAN-batched, cooperatively-yielding phases described in
    /// the module's invariants.
    ///
    /// # Errors
    /// Returns an error if scanning or reconciliation writes fail.
    pub async fn cleanup_orphaned_data(&self, active_cids: &HashSet<String>) -> Result<u64> {
        let mut removed = 0u64;

        let orphan_ids = self.scan_ids(&self.keys.subscriptions_scan_pattern(), active_cids).await?;
        for batch in orphan_ids.chunks(self.cleanup_batch_size) {
            for cid in batch {
                removed += u64::from(self.purge_client_subscriptions(cid).await?);
            }
            tokio::task::yield_now().await;
        }

        let orphan_queues = self.scan_ids(&self.keys.messages_scan_pattern(), active_cids).await?;
        for batch in orphan_queues.chunks(self.cleanup_batch_size) {
            let keys: Vec<String> = batch.iter().map(|cid| self.keys.messages(cid)).collect();
            if !keys.is_empty() {
                self.pool
                    .with_connection(move |mut conn| {
                        let keys = keys.clone();
                        async move {
                            let mut pipe = redis::pipe();
                            for key in &keys {
                                pipe.del(key);
                            }
                            pipe.query_async::<()>(&mut conn).await
                        }
                    })
                    .await?;
            }
            tokio::task::yield_now().await;
        }

        self.purge_empty_channel_sets().await?;
        self.purge_empty_patterns().await?;

        Ok(removed)
    }

    /// SCAN `pattern` in cursor batches, returning the ids embedded in the
    /// matched keys that are not present in `active`.
    async fn scan_ids(&self, pattern: &str, active: &HashSet<String>) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = self
                .pool
                .with_connection(|mut conn| {
                    let pattern = pattern.to_string();
                    async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(SCAN_COUNT)
                            .query_async(&mut conn)
                            .await
                    }
                })
                .await?;

            for key in keys {
                if let Some(id) = self.keys.id_from_key(&key)
                    && !active.contains(id)
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
        Ok(found)
    }

    /// Reads one orphan's channel list, then pipeline-deletes
    /// `subscriptions:{cid}`, each `subscription:{cid}:{ch}`, `SREM`s
    /// `channels:{ch}`, and deletes `messages:{cid}`.
    async fn purge_client_subscriptions(&self, cid: &str) -> Result<bool> {
        let channels = self.get_client_subscriptions(cid).await?;
        let subs_key = self.keys.subscriptions(cid);
        let messages_key = self.keys.messages(cid);
        let meta_keys: Vec<String> = channels.iter().map(|ch| self.keys.subscription_meta(cid, ch)).collect();
        let chan_keys: Vec<String> = channels.iter().map(|ch| self.keys.channel(ch)).collect();

        self.pool
            .with_connection(move |mut conn| {
                let subs_key = subs_key.clone();
                let messages_key = messages_key.clone();
                let meta_keys = meta_keys.clone();
                let chan_keys = chan_keys.clone();
                let cid = cid.to_string();
                async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    pipe.del(&subs_key);
                    pipe.del(&messages_key);
                    for key in &meta_keys {
                        pipe.del(key);
                    }
                    for key in &chan_keys {
                        pipe.srem(key, &cid);
                    }
                    pipe.query_async::<()>(&mut conn).await
                }
            })
            .await?;
        Ok(true)
    }

    /// SCAN `channels:*`, deleting any Set whose cardinality has reached
    /// zero (the last subscriber already left via `unsubscribe` or orphan
    /// purge, but the empty Set itself wasn't cleaned up there).
    async fn purge_empty_channel_sets(&self) -> Result<()> {
        let pattern = self.keys.channels_scan_pattern();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = self
                .pool
                .with_connection(|mut conn| {
                    let pattern = pattern.clone();
                    async move {
                        redis::cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(SCAN_COUNT)
                            .query_async(&mut conn)
                            .await
                    }
                })
                .await?;

            for key in keys {
                let card: i64 = self
                    .pool
                    .with_connection(|mut conn| {
                        let key = key.clone();
                        async move { redis::cmd("SCARD").arg(&key).query_async(&mut conn).await }
                    })
                    .await?;
                if card == 0 {
                    self.pool
                        .with_connection(|mut conn| {
                            let key = key.clone();
                            async move { redis::cmd("DEL").arg(&key).query_async::<()>(&mut conn).await }
                        })
                        .await?;
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    /// For every pattern in `patterns` whose subscriber set is empty,
    /// removes it from `patterns`, deletes the Set, and evicts the cache.
    async fn purge_empty_patterns(&self) -> Result<()> {
        let patterns_key = self.keys.patterns();
        let patterns: Vec<String> = self
            .pool
            .with_connection(move |mut conn| {
                let patterns_key = patterns_key.clone();
                async move { redis::cmd("SMEMBERS").arg(&patterns_key).query_async(&mut conn).await }
            })
            .await?;

        for pattern in patterns {
            let chan_key = self.keys.channel(&pattern);
            let card: i64 = self
                .pool
                .with_connection(move |mut conn| {
                    let chan_key = chan_key.clone();
                    async move { redis::cmd("SCARD").arg(&chan_key).query_async(&mut conn).await }
                })
                .await?;
            if card == 0 {
                self.evict_empty_pattern(&pattern).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_segment_matches_star() {
        let re = compile_pattern("/a/*").expect("compiles");
        assert!(re.is_match("/a/b"));
        assert!(!re.is_match("/a/b/c"));
    }

    #[test]
    fn double_star_matches_multiple_segments() {
        let re = compile_pattern("/a/**").expect("compiles");
        assert!(re.is_match("/a/b/c"));
    }

    #[test]
    fn literal_dot_is_not_a_wildcard() {
        let re = compile_pattern("/a*b").expect("compiles");
        assert!(!re.is_match("/a.b"));
        assert!(re.is_match("/axb"));
    }

    #[test]
    fn misplaced_double_star_never_matches_path_separators() {
        let re = compile_pattern("/foo**bar/*").expect("compiles");
        assert!(!re.is_match("/foo/bar/baz"));
    }
}
