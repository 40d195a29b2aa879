// Tenant to replica cache with a sliding expiry. Every valid read renews the entry,
// so a tenant with continuous traffic is only resolved once.
use crate::metrics_defs::{
    REPLICA_CACHE_EVICTED, REPLICA_CACHE_HIT, REPLICA_CACHE_MISS, REPLICA_CACHE_SIZE,
};
use moka::notification::RemovalCause;
use moka::sync::Cache;
use shared::{counter, gauge};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest expiry a cache entry can be given.
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Identifies a tenant by its `(user, repo)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TenantKey {
    user: String,
    repo: String,
}

impl TenantKey {
    pub fn new<U, R>(user: U, repo: R) -> Self
    where
        U: Into<String>,
        R: Into<String>,
    {
        TenantKey {
            user: user.into(),
            repo: repo.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user, self.repo)
    }
}

#[derive(Clone, Debug)]
struct CacheEntry {
    replica_id: String,
    expires_at: Instant,
}

pub struct ReplicaCache {
    entries: Cache<TenantKey, CacheEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ReplicaCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self::with_clock(ttl, max_entries, Arc::new(SystemClock))
    }

    /// `ttl` is clamped to [`MAX_TTL`].
    pub fn with_clock(ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        let entries = Cache::builder()
            .max_capacity(max_entries as u64)
            .eviction_listener(|_key, _value, cause| {
                if matches!(cause, RemovalCause::Size) {
                    counter!(REPLICA_CACHE_EVICTED).increment(1);
                }
            })
            .build();

        ReplicaCache {
            entries,
            ttl: ttl.min(MAX_TTL),
            clock,
        }
    }

    /// Returns the cached replica and extends its expiry to `now + ttl`.
    /// Expired entries are removed and reported as missing.
    pub fn get(&self, key: &TenantKey) -> Option<String> {
        let now = self.clock.now();

        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => {
                self.entries.insert(
                    key.clone(),
                    CacheEntry {
                        replica_id: entry.replica_id.clone(),
                        expires_at: now + self.ttl,
                    },
                );
                counter!(REPLICA_CACHE_HIT).increment(1);
                Some(entry.replica_id)
            }
            Some(_) => {
                self.entries.invalidate(key);
                self.record_miss();
                None
            }
            None => {
                self.record_miss();
                None
            }
        }
    }

    pub fn put(&self, key: TenantKey, replica_id: String) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries.insert(
            key,
            CacheEntry {
                replica_id,
                expires_at,
            },
        );

        gauge!(REPLICA_CACHE_SIZE).set(self.entries.entry_count() as f64);
    }

    /// Number of entries, after applying pending evictions.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record_miss(&self) {
        counter!(REPLICA_CACHE_MISS).increment(1);
        gauge!(REPLICA_CACHE_SIZE).set(self.entries.entry_count() as f64);
    }
}
