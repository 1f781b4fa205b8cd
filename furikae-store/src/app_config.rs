use furikae_core::ExpiryRule;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub ticket_rules: TicketRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TicketRules {
    pub default_expiry: ExpiryRule,
    #[serde(default)]
    pub contract_expiry: HashMap<String, ExpiryRule>,
    /// brand -> brands its tickets may also redeem
    #[serde(default)]
    pub cross_eligibility: HashMap<String, Vec<String>>,
    pub reserve_timeout_ms: u64,
    pub reserve_max_retries: usize,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub sweep_interval_seconds: u64,
    pub sweep_batch_size: usize,
    pub max_slot_query_days: i64,
    #[serde(default)]
    pub auto_confirm_started_lessons: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }
fn default_lock_timeout() -> u64 { 2000 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: Option<String>,
    #[serde(default = "default_rate_limit")]
    pub requests_per_minute: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: None, requests_per_minute: default_rate_limit() }
    }
}

fn default_rate_limit() -> i64 { 100 }

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: Option<String>,
    pub group_id: String,
    pub absence_topic: String,
    pub attendance_topic: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of FURIKAE)
            // Eg.. `FURIKAE__SERVER__PORT=9000` would set `server.port`
            .add_source(config::Environment::with_prefix("FURIKAE").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn from_toml_str(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
