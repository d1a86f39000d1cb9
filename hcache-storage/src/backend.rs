#[cfg(feature = "fjall")]
pub mod fjall;
pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongodb;
#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "fjall")]
pub use self::fjall::FjallStorage;
pub use memory::InMemoryStorage;
#[cfg(feature = "mongodb")]
pub use self::mongodb::MongoStorage;
#[cfg(feature = "redis")]
pub use self::redis::RedisStorage;
