use clap::Parser;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_DATABASE: i64 = 0;
const DEFAULT_POOL_SIZE: usize = 5;
const DEFAULT_POOL_TIMEOUT_SECS: u64 = 5;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 1;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 1;
const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 1;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECS: u64 = 1;
const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MESSAGE_TTL_SECS: u64 = 3600;
const DEFAULT_SUBSCRIPTION_TTL_SECS: u64 = 3600;
const DEFAULT_GC_INTERVAL_SECS: u64 = 60;
const DEFAULT_CLEANUP_BATCH_SIZE: usize = 50;
const DEFAULT_PUBSUB_MAX_RECONNECT_ATTEMPTS: u32 = 10;
const DEFAULT_PUBSUB_RECONNECT_DELAY_SECS: u64 = 1;
const DEFAULT_NAMESPACE: &str = "faye";
const DEFAULT_LOG_LEVEL: &str = "info";
const MAX_CLEANUP_BATCH_SIZE: usize = 1000;
const MIN_CLEANUP_BATCH_SIZE: usize = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Engine configuration. Every field corresponds 1:1 to an option in the
/// engine's recognized configuration table; defaults match the reference
/// backend so two processes pointed at the same Redis agree on TTLs and
/// key layout without any explicit coordination.
#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[arg(long, env, default_value = DEFAULT_HOST)]
    pub host: String,

    #[arg(long, env, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, env, default_value_t = DEFAULT_DATABASE)]
    pub database: i64,

    #[arg(long, env)]
    pub password: Option<String>,

    #[arg(long, env, default_value_t = false)]
    pub ssl: bool,

    #[arg(long, env, default_value_t = DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    #[arg(long, env, default_value_t = DEFAULT_POOL_TIMEOUT_SECS)]
    pub pool_timeout_secs: u64,

    #[arg(long, env, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    pub connect_timeout_secs: u64,

    #[arg(long, env, default_value_t = DEFAULT_READ_TIMEOUT_SECS)]
    pub read_timeout_secs: u64,

    #[arg(long, env, default_value_t = DEFAULT_WRITE_TIMEOUT_SECS)]
    pub write_timeout_secs: u64,

    #[arg(long, env, default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    #[arg(long, env, default_value_t = DEFAULT_RETRY_DELAY_SECS)]
    pub retry_delay_secs: u64,

    #[arg(long, env, default_value_t = DEFAULT_CLIENT_TIMEOUT_SECS)]
    pub client_timeout_secs: u64,

    #[arg(long, env, default_value_t = DEFAULT_MESSAGE_TTL_SECS)]
    pub message_ttl_secs: u64,

    #[arg(long, env, default_value_t = DEFAULT_SUBSCRIPTION_TTL_SECS)]
    pub subscription_ttl_secs: u64,

    /// Garbage-collection period in seconds; 0 disables the periodic GC timer.
    #[arg(long, env, default_value_t = DEFAULT_GC_INTERVAL_SECS)]
    pub gc_interval_secs: u64,

    #[arg(long, env, default_value_t = DEFAULT_CLEANUP_BATCH_SIZE)]
    pub cleanup_batch_size: usize,

    #[arg(long, env, default_value_t = DEFAULT_PUBSUB_MAX_RECONNECT_ATTEMPTS)]
    pub pubsub_max_reconnect_attempts: u32,

    #[arg(long, env, default_value_t = DEFAULT_PUBSUB_RECONNECT_DELAY_SECS)]
    pub pubsub_reconnect_delay_secs: u64,

    #[arg(long, env, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    #[arg(long, env, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    #[arg(long, env, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE,
            password: None,
            ssl: false,
            pool_size: DEFAULT_POOL_SIZE,
            pool_timeout_secs: DEFAULT_POOL_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
            client_timeout_secs: DEFAULT_CLIENT_TIMEOUT_SECS,
            message_ttl_secs: DEFAULT_MESSAGE_TTL_SECS,
            subscription_ttl_secs: DEFAULT_SUBSCRIPTION_TTL_SECS,
            gc_interval_secs: DEFAULT_GC_INTERVAL_SECS,
            cleanup_batch_size: DEFAULT_CLEANUP_BATCH_SIZE,
            pubsub_max_reconnect_attempts: DEFAULT_PUBSUB_MAX_RECONNECT_ATTEMPTS,
            pubsub_reconnect_delay_secs: DEFAULT_PUBSUB_RECONNECT_DELAY_SECS,
            namespace: DEFAULT_NAMESPACE.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }

    /// Clamps `cleanup_batch_size` into `[1, 1000]`, per the engine's
    /// documented batching contract.
    #[must_use]
    pub fn clamped_cleanup_batch_size(&self) -> usize {
        self.cleanup_batch_size.clamp(MIN_CLEANUP_BATCH_SIZE, MAX_CLEANUP_BATCH_SIZE)
    }

    /// Builds the `redis://` connection URL from the discrete host/port/
    /// database/password/ssl fields.
    #[must_use]
    pub fn redis_url(&self) -> String {
        let scheme = if self.ssl { "rediss" } else { "redis" };
        match &self.password {
            Some(password) => format!("{scheme}://:{password}@{}:{}/{}", self.host, self.port, self.database),
            None => format!("{scheme}://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_batch_size_below_minimum() {
        let mut config = Config { cleanup_batch_size: 0, ..Config::default() };
        assert_eq!(config.clamped_cleanup_batch_size(), MIN_CLEANUP_BATCH_SIZE);
        config.cleanup_batch_size = 5000;
        assert_eq!(config.clamped_cleanup_batch_size(), MAX_CLEANUP_BATCH_SIZE);
    }

    #[test]
    fn builds_redis_url_without_password() {
        let config = Config { host: "redis.internal".to_string(), port: 6380, database: 2, ..Config::default() };
        assert_eq!(config.redis_url(), "redis://redis.internal:6380/2");
    }

    #[test]
    fn builds_redis_url_with_password_and_ssl() {
        let config = Config {
            host: "redis.internal".to_string(),
            password: Some("hunter2".to_string()),
            ssl: true,
            ..Config::default()
        };
        assert_eq!(config.redis_url(), "rediss://:hunter2@redis.internal:6379/0");
    }
}
