mod common;

use common::{spawn_engine_pair, wait_until};
use serde_json::json;
use std::time::Duration;

/// Two `Engine`s sharing a Redis stand in for two server processes: a
/// client registered on one must receive messages published through the
/// other, which only the pub/sub fan-out (not a shared in-process map)
/// can make true.
#[tokio::test]
async fn publish_on_one_engine_is_delivered_through_the_other() {
    let (e1, e2) = spawn_engine_pair().await;

    let client_id = e1.create_client().await.expect("create client on e1");
    e1.subscribe(&client_id, "/m").await.expect("subscribe on e1");

    e2.publish(&["/m".to_string()], json!({"from": "e2"}), None).await.expect("publish on e2");

    let delivered = wait_until(
        || {
            let e1 = e1.clone();
            let client_id = client_id.clone();
            async move { e1.empty_queue(&client_id).await.is_ok_and(|msgs| !msgs.is_empty()) }
        },
        Duration::from_secs(5),
    )
    .await;

    assert!(delivered, "message published on e2 never reached client registered on e1");

    e1.destroy_client(&client_id).await.expect("destroy client");
    e1.disconnect().await;
    e2.disconnect().await;
}
