//! Process-wide parsed-schema cache.
//!
//! Maps a key to an `Arc<ParsedSchema>`. Entries are built completely
//! outside the lock and published with a single insert, so a reader never
//! observes a partially constructed schema. The store is a cheap clonable
//! handle: [`ParsedSchemaCache::global`] is shared by every instance that
//! does not bring its own, tests inject isolated stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use formeval_core::{content_key_of, ParsedSchema, SchemaError};
use once_cell::sync::Lazy;
use serde::Serialize;

static GLOBAL: Lazy<ParsedSchemaCache> = Lazy::new(ParsedSchemaCache::new);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchemaCacheStats {
    pub entries: usize,
    /// Lookups answered from the store.
    pub hits: u64,
    /// Schemas parsed by [`ParsedSchemaCache::get_or_parse`].
    pub parses: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: RwLock<HashMap<String, Arc<ParsedSchema>>>,
    hits: AtomicU64,
    parses: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedSchemaCache {
    inner: Arc<Inner>,
}

impl ParsedSchemaCache {
    /// A fresh, empty store independent of the global one.
    pub fn new() -> Self {
        ParsedSchemaCache::default()
    }

    /// The process-wide store.
    pub fn global() -> &'static ParsedSchemaCache {
        &GLOBAL
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ParsedSchema>>> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ParsedSchema>>> {
        self.inner
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<Arc<ParsedSchema>> {
        let found = self.read().get(key).cloned();
        if found.is_some() {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Publish `schema` under `key`, replacing any previous entry.
    pub fn insert(&self, key: impl Into<String>, schema: Arc<ParsedSchema>) {
        let key = key.into();
        log::info!("schema cache: publish '{}'", key);
        self.write().insert(key, schema);
    }

    pub fn remove(&self, key: &str) -> Option<Arc<ParsedSchema>> {
        let removed = self.write().remove(key);
        if removed.is_some() {
            log::info!("schema cache: evict '{}'", key);
        }
        removed
    }

    /// Return the entry under `key` if it was parsed from a document with
    /// the same content as `raw`; otherwise parse `raw` and publish it,
    /// replacing any entry of different content. When two callers race on
    /// the same key and content the first published entry wins and both
    /// receive it.
    pub fn get_or_parse(
        &self,
        key: &str,
        raw: &serde_json::Value,
    ) -> Result<Arc<ParsedSchema>, SchemaError> {
        let wanted = content_key_of(raw);
        let found = self.read().get(key).cloned();
        if let Some(found) = found.filter(|s| s.content_key() == wanted) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(found);
        }
        let parsed = Arc::new(ParsedSchema::parse(raw)?);
        self.inner.parses.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.write();
        match entries.get(key) {
            Some(existing) if existing.content_key() == parsed.content_key() => {
                return Ok(Arc::clone(existing));
            }
            Some(_) => log::info!("schema cache: replace '{}' with new content", key),
            None => log::info!("schema cache: publish '{}'", key),
        }
        entries.insert(key.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn clear(&self) {
        let mut entries = self.write();
        log::info!("schema cache: evict all ({} entries)", entries.len());
        entries.clear();
    }

    pub fn stats(&self) -> SchemaCacheStats {
        SchemaCacheStats {
            entries: self.len(),
            hits: self.inner.hits.load(Ordering::Relaxed),
            parses: self.inner.parses.load(Ordering::Relaxed),
        }
    }
}
