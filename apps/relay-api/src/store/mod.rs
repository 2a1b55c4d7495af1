pub mod kv;
pub mod redis;

pub use kv::{MemoryStore, Store, StoreError};
pub use redis::RedisStore;
