pub mod keys;
pub mod memory_store;
pub mod redis_store;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;

use crate::error::StoreResult;

/// One operation inside an atomic `pipeline` call.
#[derive(Debug, Clone)]
pub enum StoreOp {
    HashSet { key: String, field: String, value: String },
    HashDel { key: String, field: String },
    SetAdd { key: String, member: String },
    SetRem { key: String, member: String },
    Delete { key: String },
}

/// Abstract K/V persistence interface the engine is built against (§4.1,
/// §6.1). Two implementations ship: a Redis-backed one for production use
/// and an in-memory one for tests and Redis-less operation.
#[async_trait]
pub trait Store: Send + Sync {
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()>;
    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<()>;
    async fn hash_get_all(&self, key: &str) -> StoreResult<Vec<(String, String)>>;
    async fn hash_mget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>>;

    /// Atomic signed-float increment of a hash field, creating it at 0 if
    /// absent. Backs the trade-counter updates.
    async fn hash_incr_float(&self, key: &str, field: &str, delta: f64) -> StoreResult<f64>;

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn set_rem(&self, key: &str, member: &str) -> StoreResult<()>;
    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Keys matching a `prefix*` glob, with the scan cursor hidden from
    /// callers (mirrors `SCAN`/`scan_iter` in the original source).
    async fn scan_keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Non-blocking whole-key delete (`UNLINK` semantics on Redis).
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// Execute a batch of ops as one atomic transaction.
    async fn pipeline(&self, ops: Vec<StoreOp>) -> StoreResult<()>;
}
