mod common;

use common::spawn_engine;
use serde_json::json;

#[tokio::test]
async fn publish_then_empty_queue_round_trips_a_single_message() {
    let engine = spawn_engine().await;

    let client_id = engine.create_client().await.expect("create client");
    engine.subscribe(&client_id, "/m").await.expect("subscribe");

    let published = engine
        .publish(&["/m".to_string()], json!({"data": "hi"}), None)
        .await
        .expect("publish");
    assert!(published);

    let messages = engine.empty_queue(&client_id).await.expect("empty queue");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data["data"], "hi");
    assert_eq!(messages[0].channel, "/m");

    let drained_again = engine.empty_queue(&client_id).await.expect("empty queue again");
    assert!(drained_again.is_empty());

    engine.destroy_client(&client_id).await.expect("destroy client");
}
