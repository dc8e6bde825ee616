pub mod memory_store;
pub mod redis_store;
pub mod store_factory;
pub mod store_metrics;

pub use memory_store::InMemoryKvStore;
pub use redis_store::RedisKvStore;
pub use store_factory::StoreFactory;
