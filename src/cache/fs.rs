//! File-backed cache store.
//!
//! Layout: `{root}/{cache}/{sha256(key)}.json`, one JSON document per entry
//! with the body base64-encoded, next to a `{sha256(key)}.key` file holding
//! the bare key. Listing reads only the `.key` files. Writes go to a temp file
//! and are renamed into place, so a crash never leaves a half-written entry
//! behind. The `.key` file is written after the entry and removed before it,
//! so every listed key has a body.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::CacheStore;
use crate::error::{Error, Result};
use crate::http::Response;

/// On-disk form of a cached response.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    stored_at: DateTime<Utc>,
}

impl StoredEntry {
    fn new(key: &str, response: &Response) -> Self {
        Self {
            key: key.to_string(),
            url: response.url.clone(),
            status: response.status,
            headers: response.headers.clone(),
            body: BASE64.encode(&response.body),
            stored_at: Utc::now(),
        }
    }

    fn into_response(self) -> Result<Response> {
        let body = BASE64
            .decode(self.body)
            .map_err(|e| Error::Storage(format!("corrupt body for {}: {e}", self.key)))?;
        Ok(Response {
            url: self.url,
            status: self.status,
            headers: self.headers,
            body: body.into(),
        })
    }
}

fn key_digest(key: &str) -> String {
    format!("{:x}", Sha256::digest(key.as_bytes()))
}

/// A cache store that persists namespaces as directories.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn cache_dir(&self, cache: &str) -> Result<PathBuf> {
        if cache.is_empty()
            || cache.starts_with('.')
            || cache.contains(['/', '\\'])
        {
            return Err(Error::Storage(format!("invalid cache name: {cache:?}")));
        }
        Ok(self.root.join(cache))
    }

    fn entry_path(&self, cache: &str, key: &str) -> Result<PathBuf> {
        Ok(self.cache_dir(cache)?.join(format!("{}.json", key_digest(key))))
    }

    fn key_path(&self, cache: &str, key: &str) -> Result<PathBuf> {
        Ok(self.cache_dir(cache)?.join(format!("{}.key", key_digest(key))))
    }

    async fn write_atomic(dir: &Path, path: &Path, contents: &[u8]) -> Result<()> {
        let tmp_path = dir.join(format!("{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp_path, contents).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_entry(path: &Path) -> Result<Option<StoredEntry>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn cache_names(&self) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_cache(&self, cache: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.cache_dir(cache)?).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self, cache: &str) -> Result<Vec<String>> {
        let mut dir = match tokio::fs::read_dir(self.cache_dir(cache)?).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut keys = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "key") {
                continue;
            }
            match tokio::fs::read_to_string(&path).await {
                Ok(key) if path.file_stem().and_then(|stem| stem.to_str()) == Some(key_digest(&key).as_str()) => {
                    keys.push(key);
                }
                Ok(_) => log::warn!("Skipping mismatched cache key {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::warn!("Skipping unreadable cache key {}: {e}", path.display()),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn get(&self, cache: &str, key: &str) -> Result<Option<Response>> {
        let path = self.entry_path(cache, key)?;
        match Self::read_entry(&path).await? {
            Some(stored) if stored.key == key => stored.into_response().map(Some),
            _ => Ok(None),
        }
    }

    async fn put(&self, cache: &str, key: &str, response: Response) -> Result<()> {
        let dir = self.cache_dir(cache)?;
        tokio::fs::create_dir_all(&dir).await?;

        let json = serde_json::to_vec(&StoredEntry::new(key, &response))?;
        Self::write_atomic(&dir, &self.entry_path(cache, key)?, &json).await?;
        Self::write_atomic(&dir, &self.key_path(cache, key)?, key.as_bytes()).await
    }

    async fn delete(&self, cache: &str, key: &str) -> Result<bool> {
        let listed = Self::remove(&self.key_path(cache, key)?).await?;
        let stored = Self::remove(&self.entry_path(cache, key)?).await?;
        Ok(listed || stored)
    }
}
