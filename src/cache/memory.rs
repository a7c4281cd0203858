// src/cache/memory.rs
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;

use super::{CacheEntry, CacheKey, FingerprintCache};

/// Default absolute TTL (no sliding refresh).
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// Unbounded in-memory cache with an optional absolute TTL.
#[derive(Debug)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Option<Duration>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_ttl(Some(DEFAULT_TTL))
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` disables expiry.
    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => {
                let age = Utc::now().signed_duration_since(entry.computed_at);
                age.to_std().map(|a| a > ttl).unwrap_or(false)
            }
        }
    }
}

impl FingerprintCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let hit = {
            let map = self.entries.read().unwrap_or_else(|p| p.into_inner());
            map.get(key).cloned()
        };
        match hit {
            Some(entry) if self.is_expired(&entry) => {
                let mut map = self.entries.write().unwrap_or_else(|p| p.into_inner());
                // Only drop it if nobody refreshed it in between.
                if map.get(key).is_some_and(|e| e.computed_at == entry.computed_at) {
                    map.remove(key);
                }
                None
            }
            other => other,
        }
    }

    fn put(&self, key: CacheKey, value: String) {
        let mut map = self.entries.write().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = map.get(&key) {
            if existing.value == value && !self.is_expired(existing) {
                return;
            }
        }
        map.insert(
            key,
            CacheEntry {
                value,
                computed_at: Utc::now(),
            },
        );
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
