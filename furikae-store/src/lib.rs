pub mod app_config;
pub mod database;
pub mod memory_repo;
pub mod redis_repo;
pub mod ticket_repo;
#[cfg(feature = "kafka")]
pub mod events;

pub use database::DbClient;
pub use memory_repo::MemoryTicketStore;
pub use redis_repo::RedisClient;
pub use ticket_repo::PgTicketStore;
#[cfg(feature = "kafka")]
pub use events::EventProducer;
