//! Named response caches.
//!
//! Every cache namespace maps absolute request URLs to stored responses.
//! Writes are last-write-wins per key, which is what lets the router and the
//! reconciler write into the same namespace without coordination.

mod fs;
mod memory;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::http::Response;

pub use fs::FsCacheStore;
pub use memory::MemoryCacheStore;

/// Abstraction over the cache storage for testability.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Lists every namespace that currently exists.
    async fn cache_names(&self) -> Result<Vec<String>>;

    /// Deletes a whole namespace. Returns true if it existed.
    async fn delete_cache(&self, cache: &str) -> Result<bool>;

    /// Lists the keys stored in a namespace. Missing namespaces are empty.
    async fn keys(&self, cache: &str) -> Result<Vec<String>>;

    /// Looks up an exact key.
    async fn get(&self, cache: &str, key: &str) -> Result<Option<Response>>;

    /// Stores a response, creating the namespace on first write.
    async fn put(&self, cache: &str, key: &str, response: Response) -> Result<()>;

    /// Removes a key. Returns true if it was present.
    async fn delete(&self, cache: &str, key: &str) -> Result<bool>;
}

/// Normalizes a cache key to `pathname + search`, the form used in manifests.
///
/// An empty query is dropped, so `/a?` and `/a` normalize alike.
#[must_use]
pub fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) if !query.is_empty() => format!("{}?{query}", url.path()),
        _ => url.path().to_string(),
    }
}
