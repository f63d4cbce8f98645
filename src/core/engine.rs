use crate::adapters::redis::{ConnectionPool, Delivery, Keys, PubSubCoordinator};
use crate::config::Config;
use crate::core::{ClientRegistry, LocalEchoSet, MessageQueue, SubscriptionManager};
use crate::domain::QueuedMessage;
use crate::error::Result;
use futures::future::try_join_all;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// Composes the Connection Pool, Client Registry, Subscription Manager,
/// Message Queue, and PubSub Coordinator into the single entry point the
/// rest of the system calls (spec §4.6). Owns publish fan-out,
/// local-echo deduplication, and the garbage-collection timer.
///
/// Cloning an `Engine` is cheap and shares all underlying state — every
/// field is itself an `Arc` or internally shared — which is how the GC
/// worker and multiple protocol-layer callers hold independent handles to
/// the same coordination state.
#[derive(Debug, Clone)]
pub struct Engine {
    server_id: Arc<str>,
    registry: Arc<ClientRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    queue: Arc<MessageQueue>,
    pubsub: Arc<PubSubCoordinator>,
    pool: Arc<ConnectionPool>,
    local_echo: Arc<LocalEchoSet>,
    gc_started: Arc<AtomicBool>,
}

impl Engine {
    /// Wires up the full stack against `config`. Does not start the GC
    /// timer — that happens lazily, on first [`Self::create_client`] or
    /// explicitly via [`Self::start_gc`].
    ///
    /// # Errors
    /// Returns an error if the initial Redis connections cannot be
    /// established.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = ConnectionPool::connect(
            &config.redis_url(),
            config.pool_size,
            config.max_retries,
            Duration::from_secs(config.retry_delay_secs),
        )
        .await?;
        let keys = Keys::new(config.namespace.clone());

        let registry = ClientRegistry::new(pool.clone(), keys.clone(), Duration::from_secs(config.client_timeout_secs));
        let subscriptions = SubscriptionManager::new(
            pool.clone(),
            keys.clone(),
            Duration::from_secs(config.subscription_ttl_secs),
            config.clamped_cleanup_batch_size(),
        );
        let queue = MessageQueue::new(pool.clone(), keys.clone(), Duration::from_secs(config.message_ttl_secs));
        let pubsub = PubSubCoordinator::new(
            pool.client(),
            keys,
            config.pubsub_max_reconnect_attempts,
            Duration::from_secs(config.pubsub_reconnect_delay_secs),
        )
        .await?;

        Ok(Self {
            server_id: Arc::from(Uuid::new_v4().to_string()),
            registry: Arc::new(registry),
            subscriptions: Arc::new(subscriptions),
            queue: Arc::new(queue),
            pubsub: Arc::new(pubsub),
            pool: Arc::new(pool),
            local_echo: Arc::new(LocalEchoSet::new()),
            gc_started: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Registers the in-process handler that receives every delivery the
    /// PubSub Coordinator demultiplexes from other processes, then starts
    /// the subscriber listener. The handler filters its own echo by
    /// `msg.id` and enqueues for the current process's resolved subscriber
    /// snapshot.
    ///
    /// Starting the listener here (rather than leaving it to start lazily
    /// on first [`Self::publish`]) matters for a process that only ever
    /// subscribes and never publishes: without an explicit start it would
    /// register a handler that never receives anything, since nothing
    /// would ever `psubscribe`.
    pub async fn start_dispatch(&self) {
        let subscriptions = Arc::clone(&self.subscriptions);
        let queue = Arc::clone(&self.queue);
        let local_echo = Arc::clone(&self.local_echo);

        self.pubsub
            .on_message(Arc::new(move |delivery: Delivery| {
                let subscriptions = Arc::clone(&subscriptions);
                let queue = Arc::clone(&queue);
                let local_echo = Arc::clone(&local_echo);
                tokio::spawn(async move {
                    let Ok(msg) = QueuedMessage::from_json(&String::from_utf8_lossy(&delivery.payload)) else {
                        tracing::warn!(channel = %delivery.channel, "dropping undecodable pubsub delivery");
                        return;
                    };
                    if local_echo.is_local_echo(&msg.id) {
                        return;
                    }
                    if let Ok(subscribers) = subscriptions.get_subscribers(&delivery.channel).await
                        && !subscribers.is_empty()
                        && let Err(err) = queue.enqueue_many(&subscribers, &msg).await
                    {
                        tracing::warn!(error = %err, channel = %delivery.channel, "failed to enqueue remote delivery");
                    }
                });
            }))
            .await;

        self.pubsub.start();
    }

    /// Generates a UUIDv4 client id, creates the registry entry, and
    /// lazily starts the GC timer. Returns the id, or an error if the
    /// registry write fails.
    ///
    /// # Errors
    /// Returns an error if the underlying registry write fails.
    pub async fn create_client(&self) -> Result<String> {
        let cid = Uuid::new_v4().to_string();
        self.registry.create(&cid, &self.server_id).await?;
        self.gc_started.store(true, Ordering::SeqCst);
        Ok(cid)
    }

    /// Unsubscribes from everything, clears the queue, then destroys the
    /// registry entry.
    ///
    /// # Errors
    /// Returns an error if any step fails.
    pub async fn destroy_client(&self, cid: &str) -> Result<bool> {
        self.subscriptions.unsubscribe_all(cid).await?;
        self.queue.clear(cid).await?;
        self.registry.destroy(cid).await
    }

    /// # Errors
    /// Returns an error if the underlying command fails.
    pub async fn client_exists(&self, cid: &str) -> Result<bool> {
        self.registry.exists(cid).await
    }

    /// Registry ping plus a subscription TTL refresh, per spec: ping
    /// keeps both the client session and its subscriptions alive.
    ///
    /// # Errors
    /// Returns an error if either refresh fails.
    pub async fn ping(&self, cid: &str) -> Result<()> {
        self.registry.ping(cid).await?;
        self.subscriptions.refresh_client_subscriptions_ttl(cid).await
    }

    /// # Errors
    /// Returns an error if the underlying write fails.
    pub async fn subscribe(&self, cid: &str, channel: &str) -> Result<bool> {
        self.subscriptions.subscribe(cid, channel).await
    }

    /// # Errors
    /// Returns an error if the underlying write fails.
    pub async fn unsubscribe(&self, cid: &str, channel: &str) -> Result<bool> {
        self.subscriptions.unsubscribe(cid, channel).await
    }

    /// Publishes `data` to every channel in `channels`. Assigns `msg.id`
    /// if absent, records it in the local-echo map before any I/O, then
    /// for each channel concurrently (a) publishes the encoded message via
    /// the PubSub Coordinator and (b) batch-enqueues it for that channel's
    /// current subscriber snapshot. Succeeds only if every per-channel
    /// operation across every channel succeeded — Rust's `async`/`await`
    /// makes the "exactly once" completion callback spec.md describes a
    /// property of the language rather than something this method has to
    /// implement by hand: a single `.await` on `try_join_all` resolves
    /// exactly once by construction.
    ///
    /// # Errors
    /// Returns an error if encoding the message or any channel's publish
    /// or enqueue fails.
    pub async fn publish(&self, channels: &[String], data: Value, client_id: Option<&str>) -> Result<bool> {
        let mut msg = QueuedMessage::new(String::new(), data);
        if let Some(cid) = client_id {
            msg = msg.with_client_id(cid);
        }
        self.local_echo.record(&msg.id);

        let results = try_join_all(channels.iter().map(|channel| {
            let msg = msg.clone();
            async move {
                let mut scoped = msg;
                scoped.channel = channel.clone();
                let payload = scoped.to_json()?;

                let subscribers = self.subscriptions.get_subscribers(channel).await?;
                let (published, _) = tokio::try_join!(
                    self.pubsub.publish(channel, payload.as_bytes()),
                    self.queue.enqueue_many(&subscribers, &scoped),
                )?;
                Ok::<bool, crate::error::EngineError>(published)
            }
        }))
        .await?;

        Ok(results.into_iter().all(|ok| ok))
    }

    /// Drains and returns every message queued for `cid`.
    ///
    /// # Errors
    /// Returns an error if the underlying command fails.
    pub async fn empty_queue(&self, cid: &str) -> Result<Vec<QueuedMessage>> {
        self.queue.dequeue_all(cid).await
    }

    /// Sweeps stale local-echo entries, reconciles the client registry,
    /// then reconciles orphaned subscription state against the surviving
    /// active client set. Returns the number of stale registry entries
    /// removed.
    ///
    /// # Errors
    /// Returns an error if any reconciliation phase fails.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        self.local_echo.sweep();
        let removed = self.registry.cleanup_expired().await?;
        let active: HashSet<String> = self.registry.all().await?.into_iter().collect();
        self.subscriptions.cleanup_orphaned_data(&active).await?;
        Ok(removed)
    }

    /// True once the GC timer has been armed (by a client creation or an
    /// explicit [`Self::start_gc`] call); read by the GC worker to decide
    /// whether to begin ticking.
    #[must_use]
    pub fn gc_started(&self) -> bool {
        self.gc_started.load(Ordering::SeqCst)
    }

    /// Explicitly arms the GC timer without waiting for a client creation.
    pub fn start_gc(&self) {
        self.gc_started.store(true, Ordering::SeqCst);
    }

    /// Disconnects the PubSub Coordinator. The connection pool has no
    /// explicit close step — its connections are dropped with the last
    /// `Arc` reference.
    pub async fn disconnect(&self) {
        self.pubsub.disconnect().await;
        self.gc_started.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }
}
