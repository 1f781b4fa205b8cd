use anyhow::Context;
use furikae_api::{app, state::engine_settings, AppState};
use furikae_core::{EligibilityRules, EventPublisher, LogPublisher, PolicyTable, SystemClock, TicketStore};
use furikae_store::app_config::{Config, StorageBackend};
use furikae_store::{DbClient, MemoryTicketStore, PgTicketStore, RedisClient};
use furikae_ticket::Engine;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "furikae_api=debug,furikae_ticket=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Furikae API on port {}", config.server.port);

    // Storage
    let (store, rules) = match config.storage.backend {
        StorageBackend::Postgres => {
            let db = DbClient::new(&config.database)
                .await
                .context("Failed to connect to Postgres")?;
            db.migrate().await.context("Failed to run migrations")?;
            let rules = db
                .fetch_rule_overrides(config.ticket_rules.clone())
                .await
                .context("Failed to load rule overrides")?;
            let store: Arc<dyn TicketStore> =
                Arc::new(PgTicketStore::new(db.pool.clone(), config.database.lock_timeout_ms));
            (store, rules)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using the in-memory store; state is lost on restart");
            let store: Arc<dyn TicketStore> = Arc::new(MemoryTicketStore::new());
            (store, config.ticket_rules.clone())
        }
    };

    let events = event_publisher(&config)?;

    let engine = Engine::new(
        store,
        Arc::new(SystemClock),
        events,
        PolicyTable::from_rules(rules.default_expiry.clone(), &rules.contract_expiry),
        EligibilityRules::new(rules.cross_eligibility.clone()),
        engine_settings(&rules),
    );

    tokio::spawn(
        engine
            .sweeper
            .clone()
            .run(Duration::from_secs(rules.sweep_interval_seconds.max(1))),
    );

    #[cfg(feature = "kafka")]
    {
        if let Some(brokers) = config.kafka.brokers.clone() {
            let worker = furikae_api::worker::start_event_worker(
                brokers,
                config.kafka.group_id.clone(),
                config.kafka.absence_topic.clone(),
                config.kafka.attendance_topic.clone(),
                engine.clone(),
            );
            tokio::spawn(async move {
                if let Err(e) = worker.await {
                    tracing::error!("Event worker stopped: {}", e);
                }
            });
        }
    }

    let mut app_state = AppState::new(engine);

    // Redis Connection
    if let Some(url) = config.redis.url.as_deref() {
        let redis_client = RedisClient::new(url).await.context("Failed to connect to Redis")?;
        app_state = app_state.with_rate_limit(Arc::new(redis_client), config.redis.requests_per_minute);
    }

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

#[cfg(feature = "kafka")]
fn event_publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    match config.kafka.brokers.as_deref() {
        Some(brokers) => {
            let producer = furikae_store::EventProducer::new(brokers).context("Failed to create Kafka producer")?;
            Ok(Arc::new(producer))
        }
        None => Ok(Arc::new(LogPublisher)),
    }
}

#[cfg(not(feature = "kafka"))]
fn event_publisher(_config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    Ok(Arc::new(LogPublisher))
}
