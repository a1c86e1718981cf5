//! Per-instance evaluation cache.
//!
//! One entry per evaluation unit, tagged with a fingerprint of the values
//! at every path the unit reads. A lookup hits only when the stored
//! fingerprint matches the current one, so an entry whose inputs changed
//! is superseded on the next store and can never be served stale.

use std::collections::HashMap;

use formeval_core::{DataPath, UnitId};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::evaluated::Resolved;

pub type Fingerprint = [u8; 32];

/// Hash of `(path, value)` for every read, in the unit's sorted read order.
pub fn fingerprint(reads: &[DataPath], root: &serde_json::Value) -> Fingerprint {
    let mut hasher = Sha256::new();
    for path in reads {
        hasher.update(path.to_string().as_bytes());
        hasher.update([0u8]);
        match path.lookup(root) {
            Some(v) => {
                hasher.update([1u8]);
                hasher.update(v.to_string().as_bytes());
            }
            None => hasher.update([2u8]),
        }
        hasher.update([0u8]);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    fingerprint: Fingerprint,
    resolved: Resolved,
}

#[derive(Debug, Clone, Default)]
pub struct EvalCache {
    entries: HashMap<UnitId, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl EvalCache {
    pub fn new() -> Self {
        EvalCache::default()
    }

    /// Counted lookup. `None` as fingerprint is an uncacheable unit and
    /// always misses.
    pub fn lookup(&mut self, unit: UnitId, fp: Option<&Fingerprint>) -> Option<Resolved> {
        let hit = fp.and_then(|fp| {
            self.entries
                .get(&unit)
                .filter(|e| &e.fingerprint == fp)
                .map(|e| e.resolved.clone())
        });
        match hit {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        hit
    }

    pub fn store(&mut self, unit: UnitId, fingerprint: Fingerprint, resolved: Resolved) {
        self.entries.insert(
            unit,
            CacheEntry {
                fingerprint,
                resolved,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }

    /// Drop every entry and reset the counters.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }
}
