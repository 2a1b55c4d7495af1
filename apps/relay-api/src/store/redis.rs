//! Redis-backed [`Store`] over a shared `ConnectionManager`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::RedisConfig;

use super::{Store, StoreError};

/// Resolve the configured Redis deployment to a connection URL.
///
/// Standalone nodes map directly; Sentinel groups are resolved by asking a
/// sentinel for the current primary of the named service.
pub async fn resolve_url(config: &RedisConfig) -> Result<String, StoreError> {
    match config {
        RedisConfig::Standalone {
            host,
            port,
            password,
        } => Ok(format_url(host, *port, password.as_deref())),
        RedisConfig::Sentinel {
            host,
            port,
            service_name,
            password,
        } => {
            let client = redis::Client::open(format!("redis://{host}:{port}"))
                .map_err(backend)?;
            let mut conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(backend)?;
            let (primary_host, primary_port): (String, u16) = redis::cmd("SENTINEL")
                .arg("get-master-addr-by-name")
                .arg(service_name)
                .query_async(&mut conn)
                .await
                .map_err(backend)?;
            Ok(format_url(&primary_host, primary_port, password.as_deref()))
        }
    }
}

fn format_url(host: &str, port: u16, password: Option<&str>) -> String {
    match password {
        Some(password) => format!("redis://:{password}@{host}:{port}"),
        None => format!("redis://{host}:{port}"),
    }
}

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to the configured deployment. The `ConnectionManager` handles
    /// reconnection internally after transient failures.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let url = resolve_url(config).await?;
        let client = redis::Client::open(url).map_err(backend)?;
        let conn = ConnectionManager::new(client).await.map_err(backend)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(backend)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value).await.map_err(backend)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(backend)
    }

    async fn incr(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        conn.incr(key, 1i64).await.map_err(backend)
    }

    async fn decr_floor(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.decr(key, 1i64).await.map_err(backend)?;
        if value < 0 {
            // Interrupted transitions can drive the counter negative; clamp.
            conn.set::<_, _, ()>(key, 0i64).await.map_err(backend)?;
            return Ok(0);
        }
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(key, ttl_secs as i64)
            .await
            .map_err(backend)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(key, member, score)
            .await
            .map_err(backend)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.zrem(key, member).await.map_err(backend)?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.zcard(key).await.map_err(backend)?;
        Ok(count.max(0) as usize)
    }

    async fn zrevrange(
        &self,
        key: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<String>, StoreError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let start = offset as isize;
        let stop = (offset + count - 1) as isize;
        conn.zrevrange(key, start, stop).await.map_err(backend)
    }

    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let mut conn = self.conn.clone();
        conn.zrange_withscores(key, 0, -1).await.map_err(backend)
    }

    async fn zremrange_lowest(&self, key: &str, n: usize) -> Result<(), StoreError> {
        if n == 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.zremrangebyrank::<_, ()>(key, 0, n as isize - 1)
            .await
            .map_err(backend)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(backend)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await.map_err(backend)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(backend)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.hdel(key, field).await.map_err(backend)?;
        Ok(removed > 0)
    }

    async fn hlen(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        let count: i64 = conn.hlen(key).await.map_err(backend)?;
        Ok(count.max(0) as usize)
    }
}
