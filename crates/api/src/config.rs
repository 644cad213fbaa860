//! Process configuration.
//!
//! Merge order (later overrides earlier):
//! 1. Compiled defaults
//! 2. The TOML file (`parley.toml` unless a path is given)
//! 3. `PARLEY_*` environment variables, `__` separating sections
//!    (`PARLEY_OUTBOX__WORKERS=8` sets `outbox.workers`)
//!
//! Durations are integer milliseconds in `*_ms` keys.

use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use parley_events::StreamSettings;
use parley_infra::manager::DEFAULT_POOL_CAPACITY;
use parley_infra::outbox::OutboxSettings;
use parley_infra::producer::MessageCipher;
use parley_observability::{LogLevel, LogSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "parley.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("loading config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Stage,
    Prod,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub env: Environment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Operator endpoints (`/debug/*`). Keep it off the public network.
    pub debug_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            debug_addr: "127.0.0.1:8079".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Absent: in-memory store (dev only).
    pub postgres_url: Option<String>,
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub workers: usize,
    pub idle_time_ms: u64,
    pub reserve_for_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            idle_time_ms: 1_000,
            reserve_for_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSchedulerConfig {
    pub period_ms: u64,
}

impl Default for ManagerSchedulerConfig {
    fn default() -> Self {
        Self { period_ms: 1_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerLoadConfig {
    pub max_problems_at_same_time: usize,
}

impl Default for ManagerLoadConfig {
    fn default() -> Self {
        Self {
            max_problems_at_same_time: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerPoolConfig {
    pub capacity: usize,
}

impl Default for ManagerPoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub ping_period_ms: u64,
    pub send_timeout_ms: u64,
    pub buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ping_period_ms: 3_000,
            send_timeout_ms: 100,
            buffer: 32,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MsgProducerConfig {
    /// Absent: messages are recorded in memory (dev only).
    pub redis_url: Option<String>,
    pub stream_key: Option<String>,
    /// 64 hex characters (AES-256 key).
    pub encrypt_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    pub log: LogConfig,
    pub server: ServerConfig,
    pub db: DbConfig,
    pub outbox: OutboxConfig,
    pub manager_scheduler: ManagerSchedulerConfig,
    pub manager_load: ManagerLoadConfig,
    pub manager_pool: ManagerPoolConfig,
    pub stream: StreamConfig,
    pub msg_producer: MsgProducerConfig,
}

fn env_provider() -> Env {
    Env::prefixed("PARLEY_").split("__")
}

fn extract(figment: Figment) -> Result<Config, ConfigError> {
    let config: Config = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

/// Defaults, then `path` (or `parley.toml`) if it exists, then the environment.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    extract(
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(file))
            .merge(env_provider()),
    )
}

/// Defaults merged with a TOML string. No environment lookup.
pub fn load_from_str(toml: &str) -> Result<Config, ConfigError> {
    extract(
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(toml)),
    )
}

fn check<T>(key: &str, value: T, range: RangeInclusive<T>) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Debug,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{key} must be in {:?}..={:?}, got {value:?}",
            range.start(),
            range.end()
        )))
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check("outbox.workers", self.outbox.workers, 1..=32)?;
        check("outbox.idle_time_ms", self.outbox.idle_time_ms, 100..=10_000)?;
        check("outbox.reserve_for_ms", self.outbox.reserve_for_ms, 1_000..=600_000)?;
        check("manager_scheduler.period_ms", self.manager_scheduler.period_ms, 100..=60_000)?;
        check(
            "manager_load.max_problems_at_same_time",
            self.manager_load.max_problems_at_same_time,
            1..=30,
        )?;
        check("manager_pool.capacity", self.manager_pool.capacity, 1..=1000)?;
        check("stream.ping_period_ms", self.stream.ping_period_ms, 100..=30_000)?;
        check("stream.send_timeout_ms", self.stream.send_timeout_ms, 1..=10_000)?;
        check("stream.buffer", self.stream.buffer, 1..=4096)?;
        check("db.max_connections", self.db.max_connections, 1..=200)?;

        if let Some(key) = &self.msg_producer.encrypt_key {
            MessageCipher::from_hex(key)
                .map_err(|e| ConfigError::Invalid(format!("msg_producer.encrypt_key: {e}")))?;
        }
        if self.global.env == Environment::Prod && self.db.postgres_url.is_none() {
            return Err(ConfigError::Invalid(
                "db.postgres_url is required in prod".to_string(),
            ));
        }
        if self.global.env == Environment::Prod && self.msg_producer.redis_url.is_none() {
            return Err(ConfigError::Invalid(
                "msg_producer.redis_url is required in prod".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_prod(&self) -> bool {
        self.global.env == Environment::Prod
    }

    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            level: self.log.level,
            json: self.is_prod(),
        }
    }

    pub fn outbox_settings(&self) -> OutboxSettings {
        OutboxSettings {
            workers: self.outbox.workers,
            idle_time: Duration::from_millis(self.outbox.idle_time_ms),
            reserve_for: Duration::from_millis(self.outbox.reserve_for_ms),
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            buffer: self.stream.buffer,
            send_timeout: Duration::from_millis(self.stream.send_timeout_ms),
        }
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.stream.ping_period_ms)
    }

    pub fn scheduler_period(&self) -> Duration {
        Duration::from_millis(self.manager_scheduler.period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = load_from_str("").unwrap();
        assert_eq!(config.outbox.workers, 4);
        assert_eq!(config.manager_pool.capacity, 1000);
        assert_eq!(config.ping_period(), Duration::from_secs(3));
        assert_eq!(config.global.env, Environment::Dev);
        assert!(!config.log_settings().json);
    }

    #[test]
    fn file_values_override_defaults() {
        let config = load_from_str(
            r#"
            [global]
            env = "stage"

            [log]
            level = "debug"

            [outbox]
            workers = 8
            idle_time_ms = 250

            [stream]
            ping_period_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.global.env, Environment::Stage);
        assert_eq!(config.log.level, LogLevel::Debug);
        let outbox = config.outbox_settings();
        assert_eq!(outbox.workers, 8);
        assert_eq!(outbox.idle_time, Duration::from_millis(250));
        assert_eq!(outbox.reserve_for, Duration::from_secs(300));
        assert_eq!(config.ping_period(), Duration::from_millis(500));
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = load_from_str("[outbox]\nworkers = 0").unwrap_err();
        assert!(err.to_string().contains("outbox.workers"), "{err}");

        let err = load_from_str("[manager_load]\nmax_problems_at_same_time = 31").unwrap_err();
        assert!(err.to_string().contains("max_problems_at_same_time"), "{err}");

        let err = load_from_str("[manager_scheduler]\nperiod_ms = 50").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_log_level_fails_to_load() {
        let err = load_from_str("[log]\nlevel = \"verbose\"").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn encrypt_key_must_be_32_hex_bytes() {
        assert!(load_from_str("[msg_producer]\nencrypt_key = \"abcd\"").is_err());

        let key = "00".repeat(32);
        let config = load_from_str(&format!("[msg_producer]\nencrypt_key = \"{key}\"")).unwrap();
        assert_eq!(config.msg_producer.encrypt_key.as_deref(), Some(key.as_str()));
    }

    #[test]
    fn prod_requires_real_backends() {
        let err = load_from_str("[global]\nenv = \"prod\"").unwrap_err();
        assert!(err.to_string().contains("postgres_url"), "{err}");

        let config = load_from_str(
            r#"
            [global]
            env = "prod"
            [db]
            postgres_url = "postgres://localhost/parley"
            [msg_producer]
            redis_url = "redis://localhost:6379"
            "#,
        )
        .unwrap();
        assert!(config.log_settings().json);
    }
}
