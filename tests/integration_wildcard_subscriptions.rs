mod common;

use common::spawn_engine;
use serde_json::json;

#[tokio::test]
async fn double_star_pattern_matches_nested_channels_only() {
    let engine = spawn_engine().await;
    let client_id = engine.create_client().await.expect("create client");

    engine.subscribe(&client_id, "/chat/**").await.expect("subscribe to pattern");

    engine
        .publish(&["/chat/r1/private".to_string()], json!({"text": "hello"}), None)
        .await
        .expect("publish matching channel");
    engine.publish(&["/other".to_string()], json!({"text": "ignored"}), None).await.expect("publish unrelated channel");

    let messages = engine.empty_queue(&client_id).await.expect("empty queue");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].channel, "/chat/r1/private");
    assert_eq!(messages[0].data["text"], "hello");

    engine.destroy_client(&client_id).await.expect("destroy client");
}
