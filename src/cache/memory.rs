//! In-memory cache store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::CacheStore;
use crate::error::{Error, Result};
use crate::http::Response;

type Namespaces = HashMap<String, BTreeMap<String, Response>>;

/// A process-local cache store. Contents are lost when it is dropped.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    caches: Mutex<Namespaces>,
}

impl MemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Namespaces) -> T) -> Result<T> {
        let mut caches = self
            .caches
            .lock()
            .map_err(|_| Error::Storage("cache lock poisoned".to_string()))?;
        Ok(f(&mut caches))
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn cache_names(&self) -> Result<Vec<String>> {
        self.with(|caches| {
            let mut names: Vec<String> = caches.keys().cloned().collect();
            names.sort();
            names
        })
    }

    async fn delete_cache(&self, cache: &str) -> Result<bool> {
        self.with(|caches| caches.remove(cache).is_some())
    }

    async fn keys(&self, cache: &str) -> Result<Vec<String>> {
        self.with(|caches| {
            caches
                .get(cache)
                .map(|entries| entries.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn get(&self, cache: &str, key: &str) -> Result<Option<Response>> {
        self.with(|caches| caches.get(cache).and_then(|entries| entries.get(key).cloned()))
    }

    async fn put(&self, cache: &str, key: &str, response: Response) -> Result<()> {
        self.with(|caches| {
            caches
                .entry(cache.to_string())
                .or_default()
                .insert(key.to_string(), response);
        })
    }

    async fn delete(&self, cache: &str, key: &str) -> Result<bool> {
        self.with(|caches| {
            caches
                .get_mut(cache)
                .is_some_and(|entries| entries.remove(key).is_some())
        })
    }
}
