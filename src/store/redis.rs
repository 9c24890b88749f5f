//! Redis-backed store.
//!
//! Uses a `ConnectionManager`, which multiplexes commands over one
//! connection and reconnects on its own. Cloning it is cheap, so each
//! operation takes its own handle.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use tokio::time;

use crate::store::{KvStore, StoreError};

// INCR, then give the key a TTL if it has none (TTL < 0). A counter that
// somehow lost its expiry gets one back on the next hit.
const INCREMENT_WITHIN: &str = r"
local count = redis.call('INCR', KEYS[1])
if redis.call('TTL', KEYS[1]) < 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
";

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    command_timeout: Duration,
    increment_within: redis::Script,
}

impl RedisStore {
    pub async fn connect(url: &str, command_timeout: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // The initial connect gets a more generous deadline than a single command.
        let conn = time::timeout(command_timeout * 10, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(command_timeout * 10))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        tracing::info!(command_timeout_ms = command_timeout.as_millis() as u64, "connected to redis");
        Ok(Self {
            conn,
            command_timeout,
            increment_within: redis::Script::new(INCREMENT_WITHIN),
        })
    }

    async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match time::timeout(self.command_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::debug!(op, error = %e, "redis command failed");
                Err(classify(e))
            }
            Err(_) => Err(StoreError::Timeout(self.command_timeout)),
        }
    }
}

fn classify(err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(err.to_string())
    } else if err.is_timeout() {
        StoreError::Command(format!("timeout: {err}"))
    } else {
        StoreError::Command(err.to_string())
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        self.run("incr", async move { conn.incr(key, 1i64).await }).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let secs = ttl_secs(ttl) as i64;
        self.run("expire", async move { conn.expire(key, secs).await }).await
    }

    async fn increment_within(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let secs = ttl_secs(ttl);
        let script = &self.increment_within;
        self.run("incr_within", async move {
            script.key(key).arg(secs).invoke_async(&mut conn).await
        })
        .await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        self.run("exists", async move { conn.exists(key).await }).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _removed: i64 = self.run("del", async move { conn.del(key).await }).await?;
        Ok(())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let secs = ttl_secs(ttl);
        self.run("set_ex", async move { conn.set_ex(key, value, secs).await })
            .await
    }
}
