// src/cache.rs
// Memoizes recognition results keyed by (content digest, extraction
// kind). The digest is higher fidelity than the change detector's cheap
// fingerprint so distinct card faces do not collide; a changed region
// naturally produces a new digest, so no pixel-level invalidation exists.

use crate::config::CacheConfig;
use crate::types::{ExtractionKind, RecognitionResult};
use image::imageops::FilterType;
use image::DynamicImage;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub content: u64,
    pub kind: ExtractionKind,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: RecognitionResult,
    stored_at: Instant,
    hits: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Bounded, LRU-evicted, TTL-expired result cache.
pub struct RecognitionCache {
    cfg: CacheConfig,
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
    stats: CacheStats,
}

impl RecognitionCache {
    pub fn new(cfg: CacheConfig) -> Self {
        Self {
            cfg,
            entries: HashMap::new(),
            order: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    /// SHA-256 over a grayscale downsample of the region, folded to 64
    /// bits of key material.
    pub fn content_digest(&self, region: &DynamicImage) -> u64 {
        let grid = self.cfg.digest_grid.max(1);
        let small = region.resize_exact(grid, grid, FilterType::Nearest).to_luma8();
        let mut hasher = Sha256::new();
        hasher.update(small.as_raw());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }

    /// Look up by content; compute and store on miss. Returns the result
    /// and whether it was served from cache.
    pub fn get<F>(
        &mut self,
        region: &DynamicImage,
        kind: ExtractionKind,
        compute: F,
    ) -> (RecognitionResult, bool)
    where
        F: FnOnce() -> RecognitionResult,
    {
        let key = CacheKey {
            content: self.content_digest(region),
            kind,
        };

        if let Some(entry) = self.entries.get_mut(&key) {
            if entry.stored_at.elapsed() <= self.cfg.ttl {
                entry.hits += 1;
                self.stats.hits += 1;
                let result = entry.result.clone();
                self.touch(key);
                return (result, true);
            }
            // Expired in place.
            self.entries.remove(&key);
            self.order.retain(|k| k != &key);
            self.stats.expirations += 1;
            debug!(?kind, "cache entry expired");
        }

        self.stats.misses += 1;
        let result = compute();
        // A value-less result usually means a transient failure (every
        // strategy abstained); memoizing it would replay the failure for
        // the whole TTL after the backend recovers.
        if result.value.is_some() {
            self.insert(key, result.clone());
        }
        (result, false)
    }

    /// Clear entries of one kind, or everything.
    pub fn invalidate(&mut self, kind: Option<ExtractionKind>) {
        match kind {
            Some(kind) => {
                self.entries.retain(|k, _| k.kind != kind);
                self.order.retain(|k| k.kind != kind);
            }
            None => {
                self.entries.clear();
                self.order.clear();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    fn insert(&mut self, key: CacheKey, result: RecognitionResult) {
        if self.cfg.capacity == 0 {
            return;
        }
        self.entries.insert(
            key,
            CacheEntry {
                result,
                stored_at: Instant::now(),
                hits: 0,
            },
        );
        self.touch(key);
        while self.entries.len() > self.cfg.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                self.stats.evictions += 1;
            } else {
                break;
            }
        }
    }

    fn touch(&mut self, key: CacheKey) {
        self.order.retain(|k| k != &key);
        self.order.push_back(key);
    }
}
