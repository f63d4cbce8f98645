mod common;

use faye_redis::config::Config;
use faye_redis::core::Engine;

/// The reconnect backoff schedule itself (exponential growth capped at
/// 60s, stopping at `pubsub_max_reconnect_attempts`) is unit-tested
/// alongside [`faye_redis::adapters::redis::PubSubCoordinator::backoff_delay`].
/// This checks the other half of the connection story: a host nothing is
/// listening on must fail [`Engine::connect`] within the configured retry
/// budget rather than hang.
#[tokio::test]
async fn connect_against_an_unreachable_host_fails_within_the_retry_budget() {
    let config = Config {
        host: "127.0.0.1".to_string(),
        port: 1, // nothing listens on a privileged port 1 in test environments
        max_retries: 2,
        retry_delay_secs: 0,
        namespace: "faye-test-unreachable".to_string(),
        ..Config::default()
    };

    let result = tokio::time::timeout(std::time::Duration::from_secs(10), Engine::connect(&config)).await;

    match result {
        Ok(engine_result) => assert!(engine_result.is_err(), "connecting to an unreachable host should fail"),
        Err(_elapsed) => panic!("Engine::connect hung past its retry budget instead of failing"),
    }
}
