//! TTL key/value cache used for dedup and cooldown tracking
//!
//! All dedup and cooldown logic in the platform is built on the atomic
//! `get_or_set` primitive: callers never need additional locking around it.
//! Production deployments may back the trait with a shared store;
//! `MemoryCache` is the in-process implementation used by the runtime and
//! tests.
//!
//! Key formats:
//! - `dedup:{source_id}:{metric}:{location_bucket}:{window_bucket}`
//! - `cooldown:{rule_id}:{scope_id}`
//! - `seen:{idempotency_key}` (consumer-side redelivery guard)

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of [`Cache::get_or_set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GetOrSet {
    /// Key already held a live value; nothing was stored.
    Existing(String),
    /// Key was absent (or expired); the provided value was stored.
    Inserted,
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;

    async fn set(&self, key: &str, value: &str, ttl: Duration);

    /// Atomic check-and-store. Must not be decomposable into get + set from
    /// the caller's perspective: concurrent callers racing on one key see
    /// exactly one `Inserted`.
    async fn get_or_set(&self, key: &str, value: &str, ttl: Duration) -> GetOrSet;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

const SWEEP_THRESHOLD: usize = 10_000;

/// In-memory TTL cache. One mutex guards the map, which is what keeps
/// `get_or_set` atomic; entries expire lazily on read and are swept when the
/// map grows past [`SWEEP_THRESHOLD`].
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn sweep_if_needed(entries: &mut HashMap<String, CacheEntry>, now: Instant) {
        if entries.len() >= SWEEP_THRESHOLD {
            entries.retain(|_, e| e.live(now));
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap();
        entries
            .get(key)
            .filter(|e| e.live(now))
            .map(|e| e.value.clone())
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();
        Self::sweep_if_needed(&mut entries, now);
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
    }

    async fn get_or_set(&self, key: &str, value: &str, ttl: Duration) -> GetOrSet {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap();

        if let Some(entry) = entries.get(key) {
            if entry.live(now) {
                return GetOrSet::Existing(entry.value.clone());
            }
        }

        Self::sweep_if_needed(&mut entries, now);
        entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        GetOrSet::Inserted
    }
}
