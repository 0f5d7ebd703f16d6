pub mod app_config;
pub mod database;
pub mod pg_store;
pub mod memory_store;
pub mod redis_repo;
pub mod events;

pub use database::DbClient;
pub use pg_store::PgBookingStore;
pub use memory_store::MemoryBookingStore;
pub use redis_repo::RedisClient;
pub use events::{EventProducer, KafkaNotifier};
