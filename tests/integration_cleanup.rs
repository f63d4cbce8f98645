mod common;

use common::{spawn_engine, test_config};
use faye_redis::adapters::redis::Keys;
use std::collections::HashSet;

/// Simulates a client record disappearing outside the engine's own
/// lifecycle (a crashed process whose key expired, or an operator
/// deleting it by hand) and checks that [`faye_redis::core::Engine::cleanup_expired`]
/// reconciles the orphaned subscription state left behind.
#[tokio::test]
async fn cleanup_expired_reclaims_subscriptions_for_a_vanished_client() {
    let engine = spawn_engine().await;
    let config = test_config();
    let keys = Keys::new(config.namespace.clone());

    let client_id = engine.create_client().await.expect("create client");
    engine.subscribe(&client_id, "/x").await.expect("subscribe to /x");

    // Remove the client registry entry out-of-band, bypassing destroy_client,
    // to simulate the record vanishing without its subscriptions being torn down.
    let client_key = keys.client(&client_id);
    let index_key = keys.client_index();
    let client_id_for_removal = client_id.clone();
    engine
        .pool()
        .with_connection(move |mut conn| {
            let client_key = client_key.clone();
            let index_key = index_key.clone();
            let client_id = client_id_for_removal.clone();
            async move {
                let mut pipe = redis::pipe();
                pipe.atomic();
                pipe.del(&client_key);
                pipe.srem(&index_key, &client_id);
                pipe.query_async::<(i64, i64)>(&mut conn).await
            }
        })
        .await
        .expect("remove client record out of band");

    engine.cleanup_expired().await.expect("cleanup expired");

    let subscriptions_key = keys.subscriptions(&client_id);
    let meta_key = keys.subscription_meta(&client_id, "/x");
    let channel_key = keys.channel("/x");

    let (subs_exists, meta_exists, still_member): (bool, bool, bool) = engine
        .pool()
        .with_connection(move |mut conn| {
            let subscriptions_key = subscriptions_key.clone();
            let meta_key = meta_key.clone();
            let channel_key = channel_key.clone();
            let client_id = client_id.clone();
            async move {
                let mut pipe = redis::pipe();
                pipe.exists(&subscriptions_key);
                pipe.exists(&meta_key);
                pipe.sismember(&channel_key, &client_id);
                pipe.query_async(&mut conn).await
            }
        })
        .await
        .expect("inspect leftover keys");

    assert!(!subs_exists, "subscriptions:{{cid}} set should have been purged");
    assert!(!meta_exists, "subscription meta key should have been purged");
    assert!(!still_member, "client should no longer be a member of the channel set");

    let _ = HashSet::<String>::new();
}
