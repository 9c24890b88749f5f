//! Shared key-value store.
//!
//! Revocation entries and rate-window counters live here. Every gateway
//! instance talks to the same store and relies only on its atomic
//! primitives; there is no client-side locking.
//!
//! ```text
//! RevocationStore ─┐
//!                  ├─▶ dyn KvStore ─┬─▶ RedisStore   (production, shared)
//! RateLimiter ─────┘                └─▶ MemoryStore  (tests, single instance)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{GatewayConfig, StoreBackend};
pub use crate::error::StoreError;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

/// The narrow set of atomic operations the gateway needs.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically add one to `key` (creating it at 0) and return the new value.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Set a TTL on an existing key. Returns false when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Increment `key` and make sure it carries a TTL, setting `ttl` when it
    /// has none. Backends override this to do both in one atomic step; the
    /// fallback keeps the count when only the expiry fails.
    async fn increment_within(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let count = self.increment(key).await?;
        if count == 1 {
            if let Err(err) = self.expire(key, ttl).await {
                crate::observability::metrics::record_store_error("expire");
                tracing::warn!(error = %err, "counter created without expiry");
            }
        }
        Ok(count)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Set `key` to `value`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;
}

/// Build the configured backend. Redis connection failures are fatal at startup.
pub async fn connect(config: &GatewayConfig) -> Result<Arc<dyn KvStore>, StoreError> {
    match config.store.backend {
        StoreBackend::Redis => {
            let timeout = Duration::from_millis(config.store.command_timeout_ms);
            let store = RedisStore::connect(&config.store.url, timeout).await?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store; counters and revocations are not shared between instances");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Run store bookkeeping on its own task so it completes even if the
/// request that started it is dropped mid-flight.
pub(crate) async fn detached<F, T>(work: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>> + Send + 'static,
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(error = %e, "store task did not complete");
            Err(StoreError::Interrupted)
        }
    }
}
