use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};

use super::{Store, StoreOp};

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Redis-backed `Store`, following the teacher's connection-manager +
/// retry-with-backoff shape: a lazily (re)established `ConnectionManager`
/// behind a lock, cleared on error so the next call reconnects.
pub struct RedisStore {
    config: RedisConfig,
    client: redis::Client,
    connection: Arc<RwLock<Option<ConnectionManager>>>,
}

impl RedisStore {
    pub fn new(config: RedisConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.url.clone())?;
        Ok(Self {
            config,
            client,
            connection: Arc::new(RwLock::new(None)),
        })
    }

    pub fn from_url(url: impl Into<String>) -> StoreResult<Self> {
        Self::new(RedisConfig { url: url.into(), ..Default::default() })
    }

    async fn get_connection(&self) -> StoreResult<ConnectionManager> {
        {
            let guard = self.connection.read().await;
            if let Some(conn) = guard.as_ref() {
                return Ok(conn.clone());
            }
        }
        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_connection_manager().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn with_retry<F, Fut, T>(&self, op: F) -> StoreResult<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<T>>,
    {
        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            let conn = self.get_connection().await?;
            match op(conn).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "redis op failed, will retry");
                    *self.connection.write().await = None;
                    last_err = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }
        Err(StoreError::from(last_err.unwrap()))
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        let field = field.to_string();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            let field = field.clone();
            async move { conn.hget(key, field).await }
        })
        .await
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> StoreResult<()> {
        let key = key.to_string();
        let field = field.to_string();
        let value = value.to_string();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            let field = field.clone();
            let value = value.clone();
            async move { conn.hset(key, field, value).await }
        })
        .await
    }

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<()> {
        let key = key.to_string();
        let field = field.to_string();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            let field = field.clone();
            async move { conn.hdel(key, field).await }
        })
        .await
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<Vec<(String, String)>> {
        let key = key.to_string();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            async move { conn.hgetall(key).await }
        })
        .await
    }

    async fn hash_mget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let key = key.to_string();
        let fields = fields.to_vec();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            let fields = fields.clone();
            async move { conn.hget(key, fields).await }
        })
        .await
    }

    async fn hash_incr_float(&self, key: &str, field: &str, delta: f64) -> StoreResult<f64> {
        let key = key.to_string();
        let field = field.to_string();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            let field = field.clone();
            async move {
                redis::cmd("HINCRBYFLOAT")
                    .arg(&key)
                    .arg(&field)
                    .arg(delta)
                    .query_async(&mut conn)
                    .await
            }
        })
        .await
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<()> {
        let key = key.to_string();
        let member = member.to_string();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            let member = member.clone();
            async move { conn.sadd(key, member).await }
        })
        .await
    }

    async fn set_rem(&self, key: &str, member: &str) -> StoreResult<()> {
        let key = key.to_string();
        let member = member.to_string();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            let member = member.clone();
            async move { conn.srem(key, member).await }
        })
        .await
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        let key = key.to_string();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            async move { conn.smembers(key).await }
        })
        .await
    }

    async fn scan_keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let pattern = format!("{prefix}*");
        let mut conn = self.get_connection().await?;
        let mut found = Vec::new();
        let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
        while let Some(key) = iter.next_item().await {
            found.push(key);
        }
        Ok(found)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.with_retry(move |mut conn| {
            let key = key.clone();
            async move { conn.unlink(key).await }
        })
        .await
    }

    async fn pipeline(&self, ops: Vec<StoreOp>) -> StoreResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                StoreOp::HashSet { key, field, value } => {
                    pipe.hset(key, field, value);
                }
                StoreOp::HashDel { key, field } => {
                    pipe.hdel(key, field);
                }
                StoreOp::SetAdd { key, member } => {
                    pipe.sadd(key, member);
                }
                StoreOp::SetRem { key, member } => {
                    pipe.srem(key, member);
                }
                StoreOp::Delete { key } => {
                    pipe.unlink(key);
                }
            }
        }
        self.with_retry(move |mut conn| {
            let pipe = pipe.clone();
            async move { pipe.query_async::<_, ()>(&mut conn).await }
        })
        .await
    }
}
