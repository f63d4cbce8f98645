#![allow(dead_code)]

use faye_redis::config::Config;
use faye_redis::core::Engine;
use std::sync::OnceLock;
use std::time::Duration;
use uuid::Uuid;

static INIT: OnceLock<()> = OnceLock::new();

pub fn setup_tracing() {
    INIT.get_or_init(faye_redis::telemetry::init_test_telemetry);
}

/// A config pointed at a real Redis (`REDIS_URL`, default
/// `redis://127.0.0.1:6379/0`) with a namespace unique to this call, so
/// concurrently-running tests never see each other's keys.
#[must_use]
pub fn test_config() -> Config {
    setup_tracing();
    let run_id = Uuid::new_v4().to_string();
    let mut config = Config { namespace: format!("faye-test-{run_id}"), ..Config::default() };

    if let Ok(url) = std::env::var("REDIS_URL") {
        let url = url.trim_start_matches("redis://").trim_start_matches("rediss://");
        config.ssl = std::env::var("REDIS_URL").is_ok_and(|u| u.starts_with("rediss://"));
        if let Some((host, rest)) = url.split_once(':') {
            config.host = host.to_string();
            let port_part = rest.split('/').next().unwrap_or(rest);
            if let Ok(port) = port_part.parse() {
                config.port = port;
            }
        }
    }

    config.client_timeout_secs = 5;
    config.message_ttl_secs = 60;
    config.subscription_ttl_secs = 60;
    config.gc_interval_secs = 0;
    config
}

/// Connects an [`Engine`] against a freshly namespaced config and starts
/// its cross-process dispatch handler, mirroring what [`faye_redis::App::build`]
/// does for the real binary.
pub async fn spawn_engine() -> Engine {
    let config = test_config();
    let engine = Engine::connect(&config).await.expect("connect to Redis. Is Redis running at REDIS_URL?");
    engine.start_dispatch().await;
    engine
}

/// Two independent engines sharing one namespace, standing in for two
/// server processes behind the same Redis.
pub async fn spawn_engine_pair() -> (Engine, Engine) {
    let config = test_config();
    let e1 = Engine::connect(&config).await.expect("connect engine 1");
    e1.start_dispatch().await;
    let e2 = Engine::connect(&config).await.expect("connect engine 2");
    e2.start_dispatch().await;
    (e1, e2)
}

/// Polls `condition` until it's true or `timeout` elapses. Pub/sub
/// delivery crosses a network hop, so assertions on remote-engine state
/// need to wait rather than check once.
pub async fn wait_until<F, Fut>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
