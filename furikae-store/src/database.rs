use furikae_core::ExpiryRule;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::{info, warn};

use crate::app_config::{DatabaseConfig, TicketRules};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Operator overrides stored in `ticket_rule_overrides`, layered on top of the file config.
    pub async fn fetch_rule_overrides(&self, defaults: TicketRules) -> Result<TicketRules, sqlx::Error> {
        let rows: Vec<(String, Value)> =
            sqlx::query_as("SELECT rule_key, rule_value FROM ticket_rule_overrides")
                .fetch_all(&self.pool)
                .await?;

        let mut rules = defaults;
        for (key, value) in rows {
            apply_override(&mut rules, &key, &value);
        }
        Ok(rules)
    }
}

/// Expected format: {"value": <number/bool/object>}
fn apply_override(rules: &mut TicketRules, key: &str, value: &Value) {
    let Some(v) = value.get("value") else {
        warn!("Ignoring rule override {} without a value field", key);
        return;
    };

    match key {
        "reserve_timeout_ms" => {
            if let Some(u) = v.as_u64() {
                rules.reserve_timeout_ms = u;
            }
        }
        "reserve_max_retries" => {
            if let Some(u) = v.as_u64() {
                rules.reserve_max_retries = u as usize;
            }
        }
        "sweep_batch_size" => {
            if let Some(u) = v.as_u64() {
                rules.sweep_batch_size = u as usize;
            }
        }
        "max_slot_query_days" => {
            if let Some(i) = v.as_i64() {
                rules.max_slot_query_days = i;
            }
        }
        "auto_confirm_started_lessons" => {
            if let Some(b) = v.as_bool() {
                rules.auto_confirm_started_lessons = b;
            }
        }
        "default_expiry" => match serde_json::from_value::<ExpiryRule>(v.clone()) {
            Ok(rule) => rules.default_expiry = rule,
            Err(e) => warn!("Ignoring malformed default_expiry override: {}", e),
        },
        _ => warn!("Unknown rule override key {}", key),
    }
}
