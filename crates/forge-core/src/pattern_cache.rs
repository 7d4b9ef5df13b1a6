//! Pattern Cache (C3, spec §4.3).
//!
//! Fingerprint → prior-result lookup with a TTL and a confidence floor: only
//! results with confidence ≥ 0.8 are ever stored or served, and the cache is
//! partitioned per tenant — cross-tenant sharing is forbidden (spec §4.3).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ids::TenantId;
use crate::task::TaskResult;

/// Stable hash of `(description, strategy tag, canonicalized requirements)`
/// (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Compute a fingerprint from its three inputs. Requirements are sorted
    /// before hashing so that equivalent requirement sets in different
    /// orders collide.
    pub fn compute(description: &str, strategy_tag: &str, requirements: &[String]) -> Self {
        let mut canonical = requirements.to_vec();
        canonical.sort();

        let mut hasher = Sha256::new();
        hasher.update(description.trim().to_ascii_lowercase().as_bytes());
        hasher.update(b"\0");
        hasher.update(strategy_tag.as_bytes());
        hasher.update(b"\0");
        for req in &canonical {
            hasher.update(req.as_bytes());
            hasher.update(b"\0");
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Lowercase hex representation, used as a map key and for logging.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

/// A cached generation result, keyed by fingerprint within a tenant.
#[derive(Debug, Clone)]
struct Entry {
    result: TaskResult,
    created_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

/// Cache hit/miss/size counters (spec §4.3's `stats()`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of `get` calls that returned a usable entry.
    pub hits: u64,
    /// Number of `get` calls that found nothing usable.
    pub misses: u64,
    /// Current number of live (tenant, fingerprint) entries.
    pub size: usize,
}

/// In-memory, tenant-partitioned pattern cache.
pub struct PatternCache {
    entries: parking_lot::RwLock<HashMap<(TenantId, Fingerprint), Entry>>,
    stats: parking_lot::Mutex<CacheStats>,
    ttl: Duration,
    min_confidence: f64,
}

impl PatternCache {
    /// Create a cache with the given TTL and confidence floor.
    pub fn new(ttl: Duration, min_confidence: f64) -> Self {
        Self {
            entries: parking_lot::RwLock::new(HashMap::new()),
            stats: parking_lot::Mutex::new(CacheStats::default()),
            ttl,
            min_confidence,
        }
    }

    /// Look up a fingerprint for a tenant. A hit refreshes the TTL and marks
    /// the returned result's `cache_hit` via the caller (the cache itself
    /// only returns the stored result; callers set `performance_metadata`).
    pub fn get(&self, tenant_id: TenantId, fingerprint: Fingerprint) -> Option<TaskResult> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let key = (tenant_id, fingerprint);

        let hit = match entries.get_mut(&key) {
            Some(entry) if !entry.is_expired(now) && entry.result.confidence >= self.min_confidence => {
                entry.created_at = now; // refresh TTL on hit
                Some(entry.result.clone())
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        };

        let mut stats = self.stats.lock();
        if hit.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        hit
    }

    /// Store a result if it meets the confidence floor; otherwise a no-op
    /// (spec §3 invariant: "cache entries only read when confidence ≥ 0.8" —
    /// enforced here at write time too, so no sub-threshold entry ever
    /// exists).
    pub fn put(&self, tenant_id: TenantId, fingerprint: Fingerprint, result: TaskResult) {
        if result.confidence < self.min_confidence {
            return;
        }
        let mut entries = self.entries.write();
        entries.insert(
            (tenant_id, fingerprint),
            Entry {
                result,
                created_at: Instant::now(),
                ttl: self.ttl,
            },
        );
        self.stats.lock().size = entries.len();
    }

    /// Current hit/miss/size counters.
    pub fn stats(&self) -> CacheStats {
        let mut stats = *self.stats.lock();
        stats.size = self.entries.read().len();
        stats
    }
}
