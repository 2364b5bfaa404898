//! Key-value backed state shared by every murmur process: the session and
//! revocation slots used by auth, and the per-chat recent-messages lists.

pub mod kv;
pub mod memory;
pub mod recent;
pub mod redis_kv;
pub mod tokens;

pub use kv::{KvError, KvStore};
pub use memory::MemoryKv;
pub use recent::RecentCache;
pub use redis_kv::RedisKv;
pub use tokens::TokenStore;
