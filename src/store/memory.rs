//! In-process store.
//!
//! Backs tests and single-instance deployments. An expired entry is treated
//! as absent and removed when next touched; every [`SWEEP_EVERY`] writes the
//! whole map is swept so keys nobody reads again do not pile up. Time comes
//! from `tokio::time`, so paused-clock tests can step over TTLs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::store::{KvStore, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Counter(i64),
    Text(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Writes between full sweeps of expired entries.
pub const SWEEP_EVERY: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    unavailable: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails until switched back.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Live entries, after dropping expired ones.
    pub fn len(&self) -> usize {
        self.sweep_expired();
        self.entries.len()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    // Must not be called while holding an entry guard.
    fn note_write(&self) {
        let n = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if n % SWEEP_EVERY == 0 {
            let removed = self.sweep_expired();
            if removed > 0 {
                tracing::debug!(removed, "swept expired entries");
            }
        }
    }

    fn bump(&self, key: &str, ttl: Option<Duration>) -> Result<i64, StoreError> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so concurrent increments serialize.
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Counter(0),
            expires_at: None,
        });
        if !entry.is_live(now) {
            *entry = Entry {
                value: Value::Counter(0),
                expires_at: None,
            };
        }
        let count = match &mut entry.value {
            Value::Counter(n) => {
                *n += 1;
                *n
            }
            Value::Text(_) => {
                return Err(StoreError::Command("value is not an integer".to_string()));
            }
        };
        if let (Some(ttl), None) = (ttl, entry.expires_at) {
            entry.expires_at = Some(now + ttl);
        }
        Ok(count)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining TTL of a live key, if it has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.clone();
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
            None
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        self.check_available()?;
        let count = self.bump(key, None);
        self.note_write();
        count
    }

    async fn increment_within(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        self.check_available()?;
        let count = self.bump(key, Some(ttl));
        self.note_write();
        count
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.check_available()?;
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(self.live(key).is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_available()?;
        self.entries.remove(key);
        Ok(())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.check_available()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        self.note_write();
        Ok(())
    }
}
