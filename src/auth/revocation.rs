//! Token denylist.
//!
//! A revoked token is stored as `token:denied:<sha256 hex>` with a TTL equal
//! to the token's remaining lifetime, so an entry never outlives the token
//! and the denylist bounds itself. Raw tokens never become store keys.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::instrument;

use crate::auth::token::{TokenCodec, TokenType};
use crate::store::{self, KvStore, StoreError};

pub const DENYLIST_PREFIX: &str = "token:denied:";
const DENIED_MARKER: &str = "denied";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RevocationError {
    #[error("{denied} token revoked but {failed} token was not: {source}")]
    Partial {
        denied: TokenType,
        failed: TokenType,
        #[source]
        source: StoreError,
    },

    #[error("neither token could be revoked: {0}")]
    Store(#[from] StoreError),
}

pub fn denylist_key(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    format!("{DENYLIST_PREFIX}{}", hex::encode(digest))
}

#[derive(Clone)]
pub struct RevocationStore {
    store: Arc<dyn KvStore>,
    codec: Arc<TokenCodec>,
    default_ttl: Duration,
}

impl RevocationStore {
    pub fn new(store: Arc<dyn KvStore>, codec: Arc<TokenCodec>, default_ttl: Duration) -> Self {
        Self {
            store,
            codec,
            default_ttl,
        }
    }

    pub async fn deny(&self, token: &str, ttl: Duration) -> Result<(), StoreError> {
        self.store.set(&denylist_key(token), DENIED_MARKER, ttl).await
    }

    pub async fn is_denied(&self, token: &str) -> Result<bool, StoreError> {
        self.store.exists(&denylist_key(token)).await
    }

    /// Lift a revocation.
    pub async fn allow(&self, token: &str) -> Result<(), StoreError> {
        self.store.delete(&denylist_key(token)).await
    }

    /// Remaining validity of `token`, or the conservative default when it
    /// cannot be parsed.
    pub fn remaining_ttl(&self, token: &str) -> Duration {
        match self.codec.parse(token) {
            Ok(claims) => Duration::from_secs(TokenCodec::remaining_secs(&claims)),
            Err(e) => {
                tracing::debug!(target: "gateway.auth.revocation", error = %e, "using default denylist ttl");
                self.default_ttl
            }
        }
    }

    /// Revoke an access/refresh pair independently.
    ///
    /// Runs on a detached task: once started, both writes are attempted even
    /// if the caller goes away.
    #[instrument(skip_all)]
    pub async fn deny_pair(&self, access_token: &str, refresh_token: &str) -> Result<(), RevocationError> {
        let access_key = denylist_key(access_token);
        let refresh_key = denylist_key(refresh_token);
        let access_ttl = self.remaining_ttl(access_token);
        let refresh_ttl = self.remaining_ttl(refresh_token);
        let kv = Arc::clone(&self.store);

        let (access, refresh) = store::detached(async move {
            let (access, refresh) = tokio::join!(
                kv.set(&access_key, DENIED_MARKER, access_ttl),
                kv.set(&refresh_key, DENIED_MARKER, refresh_ttl),
            );
            Ok((access, refresh))
        })
        .await?;

        match (access, refresh) {
            (Ok(()), Ok(())) => {
                tracing::info!(
                    target: "gateway.auth.revocation",
                    access_ttl_secs = access_ttl.as_secs(),
                    refresh_ttl_secs = refresh_ttl.as_secs(),
                    "token pair revoked"
                );
                Ok(())
            }
            (Ok(()), Err(e)) => {
                tracing::error!(target: "gateway.auth.revocation", error = %e, "refresh token NOT revoked, access token revoked");
                Err(RevocationError::Partial {
                    denied: TokenType::Access,
                    failed: TokenType::Refresh,
                    source: e,
                })
            }
            (Err(e), Ok(())) => {
                tracing::error!(target: "gateway.auth.revocation", error = %e, "access token NOT revoked, refresh token revoked");
                Err(RevocationError::Partial {
                    denied: TokenType::Refresh,
                    failed: TokenType::Access,
                    source: e,
                })
            }
            (Err(e), Err(_)) => {
                tracing::error!(target: "gateway.auth.revocation", error = %e, "token pair revocation failed");
                Err(RevocationError::Store(e))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn codec() -> Arc<TokenCodec> {
        Arc::new(TokenCodec::new(
            b"revocation-tests-secret-0123456789",
            Duration::from_secs(900),
            Duration::from_secs(7 * 86400),
        ))
    }

    fn revocations(store: Arc<dyn KvStore>) -> RevocationStore {
        RevocationStore::new(store, codec(), Duration::from_secs(3600))
    }

    #[test]
    fn key_hides_the_token() {
        let key = denylist_key("eyJhbGciOi.secret.sig");
        assert!(key.starts_with(DENYLIST_PREFIX));
        assert!(!key.contains("secret"));
        assert_eq!(key.len(), DENYLIST_PREFIX.len() + 64);
    }

    #[tokio::test(start_paused = true)]
    async fn deny_holds_until_ttl_elapses() {
        let store = Arc::new(MemoryStore::new());
        let revocations = revocations(store.clone());

        revocations.deny("tok", Duration::from_secs(30)).await.unwrap();
        assert!(revocations.is_denied("tok").await.unwrap());

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(revocations.is_denied("tok").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!revocations.is_denied("tok").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn allow_lifts_revocation() {
        let revocations = revocations(Arc::new(MemoryStore::new()));
        revocations.deny("tok", Duration::from_secs(30)).await.unwrap();
        revocations.allow("tok").await.unwrap();
        assert!(!revocations.is_denied("tok").await.unwrap());
    }

    #[tokio::test]
    async fn deny_pair_uses_each_tokens_remaining_lifetime() {
        let store = Arc::new(MemoryStore::new());
        let revocations = revocations(store.clone());
        let codec = codec();
        let access = codec.issue_access("m1", "m1@example.com", "USER").unwrap();
        let refresh = codec.issue_refresh("m1").unwrap();

        revocations.deny_pair(&access, &refresh).await.unwrap();

        let access_ttl = store.ttl(&denylist_key(&access)).unwrap().as_secs();
        let refresh_ttl = store.ttl(&denylist_key(&refresh)).unwrap().as_secs();
        assert!((898..=900).contains(&access_ttl), "access ttl {access_ttl}");
        assert!(refresh_ttl > 7 * 86400 - 5, "refresh ttl {refresh_ttl}");
    }

    #[tokio::test]
    async fn unparseable_token_gets_default_ttl() {
        let store = Arc::new(MemoryStore::new());
        let revocations = revocations(store.clone());
        revocations.deny_pair("garbage", "also-garbage").await.unwrap();
        let ttl = store.ttl(&denylist_key("garbage")).unwrap().as_secs();
        assert!((3598..=3600).contains(&ttl));
    }

    /// Fails writes for keys that were registered as poisoned.
    struct SelectiveStore {
        inner: MemoryStore,
        poisoned: String,
    }

    #[async_trait]
    impl KvStore for SelectiveStore {
        async fn increment(&self, key: &str) -> Result<i64, StoreError> {
            self.inner.increment(key).await
        }
        async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
            self.inner.expire(key, ttl).await
        }
        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            self.inner.exists(key).await
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.inner.delete(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
            if key == self.poisoned {
                return Err(StoreError::Unavailable("shard down".into()));
            }
            self.inner.set(key, value, ttl).await
        }
    }

    #[tokio::test]
    async fn partial_failure_is_surfaced() {
        let inner = MemoryStore::new();
        let store = Arc::new(SelectiveStore {
            inner: inner.clone(),
            poisoned: denylist_key("refresh-tok"),
        });
        let revocations = revocations(store);

        let err = revocations.deny_pair("access-tok", "refresh-tok").await.unwrap_err();
        assert!(matches!(
            err,
            RevocationError::Partial {
                denied: TokenType::Access,
                failed: TokenType::Refresh,
                ..
            }
        ));
        // The half that succeeded stays applied.
        assert!(inner.exists(&denylist_key("access-tok")).await.unwrap());
    }

    #[tokio::test]
    async fn total_failure_is_a_store_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let revocations = revocations(store);
        let err = revocations.deny_pair("a", "r").await.unwrap_err();
        assert!(matches!(err, RevocationError::Store(StoreError::Unavailable(_))));
    }
}
