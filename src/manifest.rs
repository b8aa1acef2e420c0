//! The offline manifest: which pages and files make up the offline bundle.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::http::{CacheMode, Fetcher, Request};
use crate::settings::Settings;

/// A page and the files it needs to render offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflinePage {
    /// Site-relative URL of the page itself.
    pub url: String,
    /// Files the page depends on.
    #[serde(default)]
    pub files: Vec<String>,
    /// When the page content last changed, as a Unix timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
}

/// The manifest served at the manifest path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineManifest {
    /// Pages in the bundle.
    #[serde(default)]
    pub pages: Vec<OfflinePage>,
}

impl OfflineManifest {
    /// Flattens every page URL and file into one deduplicated list,
    /// keeping first-seen order.
    #[must_use]
    pub fn desired_files(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.pages
            .iter()
            .flat_map(|page| std::iter::once(&page.url).chain(&page.files))
            .filter(|file| seen.insert(*file))
            .cloned()
            .collect()
    }
}

/// Reads the manifest from the site cache, or from the network.
pub struct ManifestFetcher {
    config: Arc<WorkerConfig>,
    caches: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    settings: Arc<Settings>,
}

impl ManifestFetcher {
    /// Creates a manifest fetcher.
    #[must_use]
    pub fn new(
        config: Arc<WorkerConfig>,
        caches: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            config,
            caches,
            fetcher,
            settings,
        }
    }

    /// Returns the manifest.
    ///
    /// Without `force_refresh` the copy in the site cache is used when present
    /// and readable; otherwise, or when forcing, the network is asked.
    ///
    /// # Errors
    ///
    /// Returns an error if the network fetch is needed and fails. A forced
    /// refresh never falls back to the cached copy.
    pub async fn fetch(&self, force_refresh: bool) -> Result<OfflineManifest> {
        self.fetch_unless_cancelled(force_refresh, &CancellationToken::new())
            .await
    }

    /// Like [`fetch`](Self::fetch), but a network copy that arrives after
    /// `token` is cancelled is returned without being stored, so a superseded
    /// caller cannot overwrite a newer manifest.
    ///
    /// # Errors
    ///
    /// Same as [`fetch`](Self::fetch).
    pub async fn fetch_unless_cancelled(
        &self,
        force_refresh: bool,
        token: &CancellationToken,
    ) -> Result<OfflineManifest> {
        if !force_refresh {
            match self.cached().await {
                Ok(Some(manifest)) => return Ok(manifest),
                Ok(None) => log::debug!("No cached manifest, fetching"),
                Err(e) => log::warn!("Cached manifest unreadable, fetching: {e}"),
            }
        }
        self.download(token).await
    }

    async fn cached(&self) -> Result<Option<OfflineManifest>> {
        let key = self.config.resolve(&self.config.manifest_path)?;
        match self.caches.get(&self.config.site_cache(), key.as_str()).await? {
            Some(response) => Ok(Some(response.json()?)),
            None => Ok(None),
        }
    }

    /// Fetches the manifest from the network, bypassing HTTP caches, stores
    /// the raw response in the site cache and stamps `last-check-updates`.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch fails, the server answers with a non-2xx
    /// status, the body is not a manifest, or the cache or settings write fails.
    pub async fn refresh(&self) -> Result<OfflineManifest> {
        self.download(&CancellationToken::new()).await
    }

    async fn download(&self, token: &CancellationToken) -> Result<OfflineManifest> {
        let url = self.config.resolve(&self.config.manifest_path)?;
        let request = Request::new(url.clone()).with_cache(CacheMode::NoCache);
        let response = self.fetcher.fetch(&request).await?.error_for_status()?;
        let manifest: OfflineManifest = response.json()?;

        if token.is_cancelled() {
            log::debug!("Manifest fetched after cancellation, not storing it");
            return Ok(manifest);
        }

        let site_cache = self.config.site_cache();
        tokio::try_join!(
            self.caches.put(&site_cache, url.as_str(), response),
            self.settings.touch_last_check_updates(),
        )?;

        log::info!("Fetched offline manifest with {} pages", manifest.pages.len());
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::http::Response;
    use crate::testing::{MockFetcher, manifest_json};
    use proptest::prelude::*;

    const ORIGIN: &str = "https://example.org";
    const MANIFEST_URL: &str = "https://example.org/offline-data.json";

    fn page(url: &str, files: &[&str]) -> OfflinePage {
        OfflinePage {
            url: url.to_string(),
            files: files.iter().map(ToString::to_string).collect(),
            updated: None,
        }
    }

    async fn setup(fetcher: Arc<MockFetcher>) -> (ManifestFetcher, Arc<MemoryCacheStore>, Arc<Settings>) {
        let config = Arc::new(WorkerConfig::new().with_origin(ORIGIN));
        let caches = Arc::new(MemoryCacheStore::new());
        let settings = Arc::new(Settings::in_memory(1).await.unwrap());
        let manifests = ManifestFetcher::new(config, caches.clone(), fetcher, settings.clone());
        (manifests, caches, settings)
    }

    #[test]
    fn desired_files_flattens_and_dedupes() {
        let manifest = OfflineManifest {
            pages: vec![
                page("/", &["/a.css", "/b.js"]),
                page("/about", &["/a.css", "/about.png"]),
                page("/a.css", &[]),
            ],
        };
        assert_eq!(
            manifest.desired_files(),
            vec!["/", "/a.css", "/b.js", "/about", "/about.png"]
        );
    }

    #[test]
    fn parses_manifest_with_extra_fields() {
        let manifest: OfflineManifest = serde_json::from_str(
            r#"{"pages":[{"url":"/","updated":1700000000,"files":["/x"],"title":"Home"}]}"#,
        )
        .unwrap();
        assert_eq!(manifest.pages[0].updated, Some(1_700_000_000));
        assert_eq!(manifest.desired_files(), vec!["/", "/x"]);

        let empty: OfflineManifest = serde_json::from_str("{}").unwrap();
        assert!(empty.desired_files().is_empty());
    }

    #[tokio::test]
    async fn cache_first_uses_cached_copy() {
        let fetcher = Arc::new(MockFetcher::new());
        let (manifests, caches, _) = setup(fetcher.clone()).await;
        caches
            .put("site-1", MANIFEST_URL, Response::new(MANIFEST_URL, 200, manifest_json(vec![("/", vec![])])))
            .await
            .unwrap();

        let manifest = manifests.fetch(false).await.unwrap();
        assert_eq!(manifest.desired_files(), vec!["/"]);
        assert_eq!(fetcher.calls(MANIFEST_URL), 0);
    }

    #[tokio::test]
    async fn cache_miss_falls_through_to_network() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_URL, 200, manifest_json(vec![("/", vec!["/x.js"])]));
        let (manifests, caches, settings) = setup(fetcher.clone()).await;

        let manifest = manifests.fetch(false).await.unwrap();
        assert_eq!(manifest.desired_files(), vec!["/", "/x.js"]);
        assert_eq!(fetcher.calls(MANIFEST_URL), 1);
        assert_eq!(fetcher.last_cache_mode(MANIFEST_URL), Some(CacheMode::NoCache));
        assert!(caches.get("site-1", MANIFEST_URL).await.unwrap().is_some());
        assert!(settings.last_check_updates().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unreadable_cached_copy_falls_through_to_network() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_URL, 200, manifest_json(vec![("/fresh", vec![])]));
        let (manifests, caches, _) = setup(fetcher.clone()).await;
        caches
            .put("site-1", MANIFEST_URL, Response::new(MANIFEST_URL, 200, "not json"))
            .await
            .unwrap();

        let manifest = manifests.fetch(false).await.unwrap();
        assert_eq!(manifest.desired_files(), vec!["/fresh"]);
    }

    #[tokio::test]
    async fn forced_refresh_ignores_cache() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_URL, 200, manifest_json(vec![("/new", vec![])]));
        let (manifests, caches, _) = setup(fetcher.clone()).await;
        caches
            .put("site-1", MANIFEST_URL, Response::new(MANIFEST_URL, 200, manifest_json(vec![("/old", vec![])])))
            .await
            .unwrap();

        let manifest = manifests.fetch(true).await.unwrap();
        assert_eq!(manifest.desired_files(), vec!["/new"]);

        let stored = caches.get("site-1", MANIFEST_URL).await.unwrap().unwrap();
        let stored: OfflineManifest = stored.json().unwrap();
        assert_eq!(stored.desired_files(), vec!["/new"]);
    }

    #[tokio::test]
    async fn forced_refresh_failure_does_not_fall_back() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.fail(MANIFEST_URL);
        let (manifests, caches, settings) = setup(fetcher).await;
        caches
            .put("site-1", MANIFEST_URL, Response::new(MANIFEST_URL, 200, manifest_json(vec![("/old", vec![])])))
            .await
            .unwrap();

        assert!(manifests.fetch(true).await.is_err());
        assert!(settings.last_check_updates().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_miss_and_network_failure_propagates() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.fail(MANIFEST_URL);
        let (manifests, _, _) = setup(fetcher).await;
        assert!(manifests.fetch(false).await.is_err());
    }

    #[tokio::test]
    async fn error_status_is_not_cached() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_URL, 503, "down");
        let (manifests, caches, _) = setup(fetcher).await;
        assert!(manifests.fetch(true).await.is_err());
        assert!(caches.get("site-1", MANIFEST_URL).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancelled_refresh_is_returned_but_not_stored() {
        let fetcher = Arc::new(MockFetcher::new());
        fetcher.respond(MANIFEST_URL, 200, manifest_json(vec![("/late", vec![])]));
        let (manifests, caches, settings) = setup(fetcher).await;
        caches
            .put("site-1", MANIFEST_URL, Response::new(MANIFEST_URL, 200, manifest_json(vec![("/kept", vec![])])))
            .await
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let manifest = manifests.fetch_unless_cancelled(true, &token).await.unwrap();
        assert_eq!(manifest.desired_files(), vec!["/late"]);

        let stored: OfflineManifest = caches.get("site-1", MANIFEST_URL).await.unwrap().unwrap().json().unwrap();
        assert_eq!(stored.desired_files(), vec!["/kept"]);
        assert!(settings.last_check_updates().await.unwrap().is_none());
    }

    proptest! {
        #[test]
        fn desired_files_is_the_deduplicated_union(
            pages in prop::collection::vec(
                ("/[a-c]{1,2}", prop::collection::vec("/[a-c]{1,2}", 0..4)),
                0..6,
            )
        ) {
            let manifest = OfflineManifest {
                pages: pages
                    .iter()
                    .map(|(url, files)| OfflinePage { url: url.clone(), files: files.clone(), updated: None })
                    .collect(),
            };
            let desired = manifest.desired_files();

            let unique: HashSet<&String> = desired.iter().collect();
            prop_assert_eq!(unique.len(), desired.len());

            let expected: HashSet<&String> = pages
                .iter()
                .flat_map(|(url, files)| std::iter::once(url).chain(files))
                .collect();
            prop_assert_eq!(unique, expected);
        }
    }
}
