use crate::error::{EngineError, Result};
use backon::{ExponentialBuilder, Retryable};
use redis::aio::ConnectionManager;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A fixed-size pool of Redis command connections. `with_connection` runs
/// an operation against one of them inside a retry loop that catches
/// transient connectivity errors (refused, timed out, dropped mid-command)
/// and retries with exponential backoff; anything else, or exhaustion of
/// `max_retries`, surfaces as [`EngineError::Connection`].
///
/// Each entry is a `redis::aio::ConnectionManager`, which is itself cheap
/// to clone and already multiplexes commands over one socket — the "pool"
/// here is a small set of independent managers so concurrent callers don't
/// serialize on a single multiplexed connection's command queue.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    client: redis::Client,
    connections: Vec<ConnectionManager>,
    next: std::sync::Arc<AtomicUsize>,
    max_retries: u32,
    retry_delay: Duration,
}

impl ConnectionPool {
    /// Opens `pool_size` command connections against `url`.
    ///
    /// # Errors
    /// Returns an error if the initial connection cannot be established.
    pub async fn connect(url: &str, pool_size: usize, max_retries: u32, retry_delay: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut connections = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            connections.push(client.get_connection_manager().await?);
        }
        Ok(Self { client, connections, next: std::sync::Arc::new(AtomicUsize::new(0)), max_retries, retry_delay })
    }

    fn pick(&self) -> ConnectionManager {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[index].clone()
    }

    /// Runs `op` against a pooled connection, retrying transient failures
    /// up to `max_retries` times with backoff `retry_delay * 2^(attempt-1)`.
    ///
    /// # Errors
    /// Returns [`EngineError::Connection`] if `op` fails with a
    /// non-retryable error, or if every retry attempt is exhausted.
    pub async fn with_connection<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let connection = self.pick();
        let strategy = ExponentialBuilder::default()
            .with_min_delay(self.retry_delay)
            .with_factor(2.0_f32)
            .with_max_times(self.max_retries as usize);

        (|| {
            let connection = connection.clone();
            let op = &op;
            async move { op(connection).await }
        })
        .retry(&strategy)
        .when(|err: &redis::RedisError| err.is_io_error() || err.is_timeout() || err.is_connection_dropped())
        .notify(|err, delay| {
            tracing::warn!(error = %err, delay = ?delay, "retrying redis command after transient error");
        })
        .await
        .map_err(EngineError::Connection)
    }

    /// Probes connectivity without raising: returns `false` for the same
    /// transient error classes `with_connection` retries, rather than
    /// propagating them.
    pub async fn connected(&self) -> bool {
        let mut connection = self.pick();
        redis::cmd("PING").query_async::<String>(&mut connection).await.is_ok()
    }

    /// A `redis::Client` handle suitable for opening the dedicated pub/sub
    /// connection. The pub/sub connection is deliberately not drawn from
    /// the pool and not retried by this layer — its own reconnect loop
    /// lives in [`super::pubsub::PubSubCoordinator`].
    #[must_use]
    pub fn client(&self) -> redis::Client {
        self.client.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_from_base() {
        let base = Duration::from_millis(100);
        let delays: Vec<Duration> = (1..=4).map(|attempt| base * 2u32.pow(attempt - 1)).collect();
        assert_eq!(delays, vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800),
        ]);
    }
}
