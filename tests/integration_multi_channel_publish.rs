mod common;

use common::spawn_engine;
use serde_json::json;

#[tokio::test]
async fn publish_to_many_channels_delivers_once_per_subscribed_channel() {
    let engine = spawn_engine().await;

    let c1 = engine.create_client().await.expect("create c1");
    let c2 = engine.create_client().await.expect("create c2");

    engine.subscribe(&c1, "/a").await.expect("c1 sub /a");
    engine.subscribe(&c1, "/b").await.expect("c1 sub /b");
    engine.subscribe(&c2, "/b").await.expect("c2 sub /b");
    engine.subscribe(&c2, "/c").await.expect("c2 sub /c");

    let channels = vec!["/a".to_string(), "/b".to_string(), "/c".to_string()];
    let published = engine.publish(&channels, json!({"n": 1}), None).await.expect("publish");
    assert!(published);

    let c1_messages = engine.empty_queue(&c1).await.expect("c1 empty queue");
    let c2_messages = engine.empty_queue(&c2).await.expect("c2 empty queue");

    assert_eq!(c1_messages.len(), 2);
    assert_eq!(c2_messages.len(), 2);

    engine.destroy_client(&c1).await.expect("destroy c1");
    engine.destroy_client(&c2).await.expect("destroy c2");
}
