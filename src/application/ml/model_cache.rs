use crate::domain::ml::learner::BaseLearner;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One cache slot. Recency is an atomic sequence number, so a hit only
/// needs the shared read lock and clock steps never reorder eviction.
#[derive(Debug)]
struct CachedModelEntry {
    model: Box<dyn BaseLearner>,
    data_hash: String,
    created_at_ms: i64,
    ttl_ms: i64,
    last_used_seq: AtomicU64,
}

impl CachedModelEntry {
    /// Logically absent once `now - created_at > ttl`, even if still stored.
    fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms - self.created_at_ms > self.ttl_ms
    }

    fn recency(&self) -> u64 {
        self.last_used_seq.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub hash_mismatches: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

/// Trained models keyed by caller-chosen names, with LRU and TTL eviction.
///
/// `get` hands out independent clones, never the stored instance.
pub struct ModelCache {
    entries: RwLock<HashMap<String, CachedModelEntry>>,
    max_size: usize,
    ttl: Duration,
    sequence: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    hash_mismatches: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("entries", &"<RwLock>")
            .field("max_size", &self.max_size)
            .field("ttl", &self.ttl)
            .finish()
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ModelCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size: max_size.max(1),
            ttl,
            sequence: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            hash_mismatches: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, key: &str) -> Option<Box<dyn BaseLearner>> {
        self.lookup(key, None, now_ms())
    }

    /// `get` evaluated at an explicit wall-clock time in epoch millis.
    pub fn get_at(&self, key: &str, now_ms: i64) -> Option<Box<dyn BaseLearner>> {
        self.lookup(key, None, now_ms)
    }

    /// Also misses when the entry was trained on data with a different hash.
    pub fn get_matching(&self, key: &str, data_hash: &str) -> Option<Box<dyn BaseLearner>> {
        self.lookup(key, Some(data_hash), now_ms())
    }

    fn lookup(&self, key: &str, data_hash: Option<&str>, now_ms: i64) -> Option<Box<dyn BaseLearner>> {
        let guard = match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("ModelCache: Lock poisoned during read, recovering");
                poisoned.into_inner()
            }
        };

        let Some(entry) = guard.get(key) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired_at(now_ms) {
            tracing::debug!(
                "ModelCache: Entry '{}' expired ({}ms old, ttl {}ms)",
                key,
                now_ms - entry.created_at_ms,
                entry.ttl_ms
            );
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.expired.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if let Some(expected) = data_hash {
            if entry.data_hash != expected {
                tracing::debug!("ModelCache: Entry '{}' was trained on different data", key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.hash_mismatches.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        entry.last_used_seq.store(self.next_seq(), Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);

        Some(entry.model.clone_trained())
    }

    /// Insert or replace `key`. Returns the key evicted to make room, if any.
    pub fn put(&self, key: &str, model: Box<dyn BaseLearner>, data_hash: &str) -> Option<String> {
        self.put_at(key, model, data_hash, now_ms())
    }

    pub fn put_at(
        &self,
        key: &str,
        model: Box<dyn BaseLearner>,
        data_hash: &str,
        now_ms: i64,
    ) -> Option<String> {
        let entry = CachedModelEntry {
            model,
            data_hash: data_hash.to_string(),
            created_at_ms: now_ms,
            ttl_ms: self.ttl.as_millis().min(i64::MAX as u128) as i64,
            last_used_seq: AtomicU64::new(self.next_seq()),
        };

        let mut guard = match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::error!("ModelCache: Lock poisoned during write, recovering");
                poisoned.into_inner()
            }
        };

        let mut evicted = None;
        if !guard.contains_key(key) && guard.len() >= self.max_size {
            let oldest = guard
                .iter()
                .min_by_key(|(_, e)| e.recency())
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                guard.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("ModelCache: Evicted least recently used '{}'", oldest);
                evicted = Some(oldest);
            }
        }

        guard.insert(key.to_string(), entry);
        evicted
    }

    /// Remove `key` regardless of TTL. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        match self.entries.write() {
            Ok(mut guard) => guard.remove(key).is_some(),
            Err(poisoned) => {
                tracing::error!("ModelCache: Lock poisoned during invalidate, recovering");
                poisoned.into_inner().remove(key).is_some()
            }
        }
    }

    pub fn clear(&self) {
        match self.entries.write() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => {
                tracing::error!("ModelCache: Lock poisoned during clear, recovering");
                poisoned.into_inner().clear()
            }
        }
    }

    /// Physically stored entries, expired ones included.
    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is physically stored, ignoring TTL.
    pub fn contains(&self, key: &str) -> bool {
        match self.entries.read() {
            Ok(guard) => guard.contains_key(key),
            Err(poisoned) => poisoned.into_inner().contains_key(key),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            max_size: self.max_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            hash_mismatches: self.hash_mismatches.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
