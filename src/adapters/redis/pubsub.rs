use crate::adapters::redis::keys::Keys;
use crate::error::Result;
use futures::StreamExt;
use rand::Rng;
use redis::AsyncCommands;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};

const RECONNECT_JITTER_RATIO: f64 = 0.3;
const RECONNECT_MAX_DELAY_SECS: u64 = 60;

/// A single channel/payload delivery handed off from the subscriber task
/// to whoever registered a handler.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: String,
    pub payload: Vec<u8>,
}

type Handler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Owns the one dedicated, non-pooled Redis connection used for the
/// engine's cross-process fan-out: a single pattern subscription on
/// `{namespace}:publish:*`, demultiplexed to one registered in-process
/// handler.
///
/// Handler registration is single-slot by design (spec: "prevents
/// duplicate processing") — a second registration logs a warning and
/// replaces the first rather than fanning out to both.
pub struct PubSubCoordinator {
    client: redis::Client,
    publisher: redis::aio::ConnectionManager,
    keys: Keys,
    handler: Arc<RwLock<Option<Handler>>>,
    started: std::sync::atomic::AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
    reconnect_attempt: Arc<AtomicU32>,
}

impl std::fmt::Debug for PubSubCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubCoordinator")
            .field("client", &self.client)
            .field("publisher", &self.publisher)
            .field("keys", &self.keys)
            .field("handler", &self.handler.try_read().map(|g| g.is_some()))
            .field("started", &self.started)
            .field("shutdown_tx", &self.shutdown_tx)
            .field("shutdown_rx", &self.shutdown_rx)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("reconnect_attempt", &self.reconnect_attempt)
            .finish()
    }
}

impl PubSubCoordinator {
    /// # Errors
    /// Returns an error if the publisher connection cannot be established.
    pub async fn new(
        client: redis::Client,
        keys: Keys,
        max_reconnect_attempts: u32,
        reconnect_delay: Duration,
    ) -> Result<Self> {
        let publisher = client.get_connection_manager().await?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            client,
            publisher,
            keys,
            handler: Arc::new(RwLock::new(None)),
            started: std::sync::atomic::AtomicBool::new(false),
            shutdown_tx,
            shutdown_rx,
            max_reconnect_attempts,
            reconnect_delay,
            reconnect_attempt: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Registers the single in-process handler for incoming deliveries.
    /// A handler already registered is replaced, with a warning logged —
    /// this is the documented single-slot behavior, not an error.
    pub async fn on_message(&self, handler: Handler) {
        let mut slot = self.handler.write().await;
        if slot.is_some() {
            tracing::warn!("replacing previously registered pubsub handler");
        }
        *slot = Some(handler);
    }

    /// Starts the background subscriber task if it isn't already running,
    /// then publishes `payload` on `publish:{channel}`. `publish` no
    /// longer needs to be the thing that starts the listener — see
    /// [`Self::start`] — but still calls through here so a
    /// publish-only process (never receiving) still ends up subscribed.
    ///
    /// # Errors
    /// Returns an error if the `PUBLISH` command fails.
    pub async fn publish(&self, channel: &str, payload: &[u8]) -> Result<bool> {
        self.ensure_started();
        let key = self.keys.publish_channel(channel);
        let mut connection = self.publisher.clone();
        let _: i64 = connection.publish(key, payload).await?;
        Ok(true)
    }

    /// Starts the background subscriber task if it isn't already running.
    /// Idempotent. A process that registers a handler but never publishes
    /// must still call this to actually begin receiving deliveries —
    /// registering a handler alone doesn't open the `psubscribe`
    /// connection.
    pub fn start(&self) {
        self.ensure_started();
    }

    fn ensure_started(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let client = self.client.clone();
        let keys = self.keys.clone();
        let handler = Arc::clone(&self.handler);
        let shutdown_rx = self.shutdown_rx.clone();
        let max_attempts = self.max_reconnect_attempts;
        let base_delay = self.reconnect_delay;
        let attempt_counter = Arc::clone(&self.reconnect_attempt);

        tokio::spawn(Self::run(client, keys, handler, shutdown_rx, max_attempts, base_delay, attempt_counter));
    }

    async fn run(
        client: redis::Client,
        keys: Keys,
        handler: Arc<RwLock<Option<Handler>>>,
        mut shutdown_rx: watch::Receiver<bool>,
        max_attempts: u32,
        base_delay: Duration,
        attempt_counter: Arc<AtomicU32>,
    ) {
        let pattern = keys.publish_pattern();
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

        let dispatch_handler = Arc::clone(&handler);
        let mut dispatch_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = dispatch_shutdown.changed() => return,
                    delivery = rx.recv() => {
                        let Some(delivery) = delivery else { return };
                        let slot = dispatch_handler.read().await;
                        if let Some(handler) = slot.as_ref() {
                            handler(delivery);
                        } else {
                            tracing::debug!("dropping pubsub delivery: no handler registered");
                        }
                    }
                }
            }
        });

        loop {
            if *shutdown_rx.borrow() {
                return;
            }

            let attempt = attempt_counter.load(Ordering::SeqCst);
            if attempt >= max_attempts {
                tracing::error!(attempts = attempt, "pubsub subscriber exhausted reconnect attempts, stopping");
                return;
            }
            if attempt > 0 {
                let delay = Self::backoff_delay(base_delay, attempt);
                tracing::warn!(attempt, delay = ?delay, "reconnecting pubsub subscriber");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => return,
                }
            }

            let mut pubsub = match client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to open pubsub connection");
                    attempt_counter.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
            };

            if let Err(err) = pubsub.psubscribe(&pattern).await {
                tracing::warn!(error = %err, pattern = %pattern, "failed to psubscribe");
                attempt_counter.fetch_add(1, Ordering::SeqCst);
                continue;
            }

            tracing::info!(pattern = %pattern, "pubsub subscriber connected");
            attempt_counter.store(0, Ordering::SeqCst);

            let mut stream = pubsub.into_on_message();
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    message = stream.next() => {
                        let Some(message) = message else {
                            tracing::warn!("pubsub connection lost, reconnecting");
                            break;
                        };
                        let channel_key = message.get_channel_name().to_string();
                        let Some(channel) = keys.channel_from_publish_key(&channel_key) else {
                            continue;
                        };
                        let delivery = Delivery { channel: channel.to_string(), payload: message.get_payload().unwrap_or_default() };
                        if tx.send(delivery).is_err() {
                            tracing::debug!("dropping pubsub delivery: dispatcher gone");
                        }
                    }
                }
            }
        }
    }

    /// `base * 2^(attempt-1)` plus up to 30% jitter, capped at 60s.
    fn backoff_delay(base: Duration, attempt: u32) -> Duration {
        let exp = base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(Duration::from_secs(RECONNECT_MAX_DELAY_SECS));
        let jitter_ratio = rand::thread_rng().r#gen::<f64>() * RECONNECT_JITTER_RATIO;
        let jitter = capped.mul_f64(jitter_ratio);
        (capped + jitter).min(Duration::from_secs(RECONNECT_MAX_DELAY_SECS))
    }

    /// Stops the subscriber task, clears the registered handler, and
    /// resets the reconnect counter. Errors quitting the dedicated
    /// connection are suppressed, matching the documented shutdown
    /// sequence (flag, then kill worker, then quit connection).
    pub async fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        *self.handler.write().await = None;
        self.reconnect_attempt.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps_at_sixty_seconds() {
        let base = Duration::from_secs(1);
        let small = PubSubCoordinator::backoff_delay(base, 1);
        let bigger = PubSubCoordinator::backoff_delay(base, 4);
        let huge = PubSubCoordinator::backoff_delay(base, 30);

        assert!(small >= Duration::from_secs(1) && small <= Duration::from_millis(1300));
        assert!(bigger > small);
        assert!(huge <= Duration::from_secs(60) + Duration::from_millis(1));
    }
}
