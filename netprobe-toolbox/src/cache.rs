//! In-memory result cache with per-entry TTL and LRU eviction.
//!
//! Keys are the exact caller input, so `Example.com` and `example.com` are
//! cached separately. Only results without an `error` should be inserted.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_used: u64,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    tick: u64,
}

/// Bounded TTL cache shared across requests.
pub struct ResultCache<V> {
    inner: Mutex<Inner<V>>,
    ttl: Duration,
    capacity: usize,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity.min(1024)),
                tick: 0,
            }),
            ttl,
            capacity,
        }
    }

    /// Fetch a live entry, refreshing its recency. Expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().ok()?;
        inner.tick += 1;
        let tick = inner.tick;

        let expired = match inner.entries.get_mut(key) {
            None => return None,
            Some(entry) if entry.inserted_at.elapsed() >= self.ttl => true,
            Some(entry) => {
                entry.last_used = tick;
                return Some(entry.value.clone());
            }
        };
        if expired {
            inner.entries.remove(key);
        }
        None
    }

    /// Store `value`, evicting the least recently used entry when full.
    pub fn insert(&self, key: &str, value: V) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.tick += 1;
        let tick = inner.tick;

        if !inner.entries.contains_key(key) && inner.entries.len() >= self.capacity {
            let ttl = self.ttl;
            inner.entries.retain(|_, e| e.inserted_at.elapsed() < ttl);
            let oldest = if inner.entries.len() >= self.capacity {
                inner
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| e.last_used)
                    .map(|(k, _)| k.clone())
            } else {
                None
            };
            if let Some(oldest) = oldest {
                log::trace!("[CACHE] Evicting {oldest}");
                inner.entries.remove(&oldest);
            }
        }

        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                inserted_at: Instant::now(),
                last_used: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map_or(0, |inner| inner.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
