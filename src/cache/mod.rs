//! Cache capability
//!
//! Injected key/value cache used for limit totals and balance snapshots.
//! Values are stored as strings; callers own the encoding. Entries either
//! expire by TTL or live until explicitly deleted.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value, honoring expiry.
    async fn get(&self, key: &str) -> Option<String>;

    /// Store a value. `ttl = None` keeps the entry until deleted.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>);

    /// Remove a key. Removing a missing key is a no-op.
    async fn delete(&self, key: &str);
}

/// In-process cache backed by a map.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        match entry.expires_at {
            Some(expires_at) if expires_at <= Instant::now() => None,
            _ => Some(entry.value.clone()),
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}
