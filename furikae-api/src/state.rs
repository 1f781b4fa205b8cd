use furikae_store::app_config::TicketRules;
use furikae_store::RedisClient;
use furikae_ticket::{Engine, EngineSettings, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    /// Rate limiting is skipped when no Redis is configured.
    pub redis: Option<Arc<RedisClient>>,
    pub requests_per_minute: i64,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        Self { engine, redis: None, requests_per_minute: 100 }
    }

    pub fn with_rate_limit(mut self, redis: Arc<RedisClient>, requests_per_minute: i64) -> Self {
        self.redis = Some(redis);
        self.requests_per_minute = requests_per_minute;
        self
    }
}

pub fn engine_settings(rules: &TicketRules) -> EngineSettings {
    EngineSettings {
        reserve_timeout: Duration::from_millis(rules.reserve_timeout_ms),
        retry: RetryPolicy::new(
            rules.reserve_max_retries,
            Duration::from_millis(rules.retry_initial_delay_ms),
            Duration::from_millis(rules.retry_max_delay_ms),
        ),
        sweep_batch_size: rules.sweep_batch_size,
        max_slot_query_days: rules.max_slot_query_days,
        auto_confirm_started_lessons: rules.auto_confirm_started_lessons,
    }
}
