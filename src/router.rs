//! Per-request cache strategy selection.
//!
//! Every outgoing request is classified into exactly one [`Strategy`]. The
//! first matching rule wins:
//!
//! 1. host not allow-listed: not intercepted
//! 2. own origin, build artifact pattern: network only
//! 3. own origin, static asset or shell file: network then site cache
//! 4. own origin, offline mode on: network then offline cache, with the
//!    image variant fallback
//! 5. own origin otherwise: network only
//! 6. allow-listed foreign host: network then site cache

use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use regex::Regex;
use tokio::task::JoinHandle;
use url::Url;

use crate::cache::CacheStore;
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::http::{Fetcher, Request, Response};
use crate::settings::Settings;

/// How a request is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Not intercepted; the host performs the request itself.
    Passthrough,
    /// Always hit the network, never touch a cache.
    NetworkOnly,
    /// Try the network, store successes, fall back to the cached copy.
    NetworkThenCache {
        /// Cache namespace read from and written to.
        cache: String,
    },
    /// Network then the offline cache, falling back to any cached variant of
    /// a resized image.
    OfflineBundle {
        /// The offline cache namespace.
        cache: String,
    },
}

/// Classification before the offline flag is consulted.
enum Route {
    Decided(Strategy),
    DependsOnOffline,
}

/// Cache writes that outlive the response they were made for.
///
/// The caller hands the response back right away and must then drive this
/// to completion, either by awaiting [`Deferred::settle`] or by handing it to
/// the runtime with [`Deferred::spawn`].
#[derive(Default)]
#[must_use = "deferred cache writes do nothing unless settled"]
pub struct Deferred {
    tasks: Vec<BoxFuture<'static, ()>>,
}

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("pending", &self.tasks.len())
            .finish()
    }
}

impl Deferred {
    fn push(&mut self, task: BoxFuture<'static, ()>) {
        self.tasks.push(task);
    }

    /// Number of pending writes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if there is nothing to wait for.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Runs every pending write to completion. Write failures are already
    /// logged and swallowed.
    pub async fn settle(self) {
        join_all(self.tasks).await;
    }

    /// Settles the writes on a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.settle())
    }
}

/// A served request.
#[derive(Debug)]
pub struct RouteOutcome {
    /// Strategy that produced the response.
    pub strategy: Strategy,
    /// The response to hand back.
    pub response: Response,
    /// Cache writes still to be driven.
    pub deferred: Deferred,
}

/// Classifies and serves intercepted requests.
pub struct CacheRouter {
    config: Arc<WorkerConfig>,
    caches: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    settings: Arc<Settings>,
    own_host: String,
    network_only: Vec<Regex>,
}

impl CacheRouter {
    /// Creates a router.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin has no host or a network-only pattern
    /// is not a valid regex.
    pub fn new(
        config: Arc<WorkerConfig>,
        caches: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        settings: Arc<Settings>,
    ) -> Result<Self> {
        let origin = config.origin_url()?;
        let own_host = origin
            .host_str()
            .ok_or(url::ParseError::EmptyHost)?
            .to_string();
        let network_only = config
            .network_only_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            caches,
            fetcher,
            settings,
            own_host,
            network_only,
        })
    }

    fn is_own_host(&self, url: &Url) -> bool {
        url.host_str() == Some(self.own_host.as_str())
    }

    fn is_allow_listed(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| {
            host == self.own_host || self.config.cacheable_hosts.iter().any(|h| h == host)
        })
    }

    fn is_image_request(&self, url: &Url) -> bool {
        self.is_own_host(url) && url.path().starts_with(&self.config.image_endpoint)
    }

    fn route(&self, url: &Url) -> Route {
        if !self.is_allow_listed(url) {
            return Route::Decided(Strategy::Passthrough);
        }
        if !self.is_own_host(url) {
            return Route::Decided(Strategy::NetworkThenCache {
                cache: self.config.site_cache(),
            });
        }

        let path = url.path();
        if self.network_only.iter().any(|re| re.is_match(path)) {
            return Route::Decided(Strategy::NetworkOnly);
        }
        if path.starts_with(&self.config.static_prefix)
            || self.config.shell_files.iter().any(|f| f == path)
        {
            return Route::Decided(Strategy::NetworkThenCache {
                cache: self.config.site_cache(),
            });
        }
        Route::DependsOnOffline
    }

    /// Classifies a request URL given the offline flag.
    #[must_use]
    pub fn classify(&self, url: &Url, offline_enabled: bool) -> Strategy {
        match self.route(url) {
            Route::Decided(strategy) => strategy,
            Route::DependsOnOffline if offline_enabled => Strategy::OfflineBundle {
                cache: self.config.offline_cache(),
            },
            Route::DependsOnOffline => Strategy::NetworkOnly,
        }
    }

    /// Classifies a request URL, reading the offline flag only when the
    /// decision depends on it.
    pub async fn strategy_for(&self, url: &Url) -> Strategy {
        match self.route(url) {
            Route::Decided(strategy) => strategy,
            Route::DependsOnOffline => {
                let enabled = self.settings.is_offline_enabled().await;
                self.classify(url, enabled)
            }
        }
    }

    /// Serves a request. Returns `None` if it is not intercepted.
    ///
    /// # Errors
    ///
    /// Returns the network error when the network fails and no cached copy
    /// (or image variant) can stand in.
    pub async fn handle(&self, request: &Request) -> Result<Option<RouteOutcome>> {
        let strategy = self.strategy_for(&request.url).await;
        let mut deferred = Deferred::default();

        let response = match &strategy {
            Strategy::Passthrough => return Ok(None),
            Strategy::NetworkOnly => self.fetcher.fetch(request).await?,
            Strategy::NetworkThenCache { cache } => {
                self.network_then_cache(request, cache, &mut deferred).await?
            }
            Strategy::OfflineBundle { cache } => {
                match self.network_then_cache(request, cache, &mut deferred).await {
                    Ok(response) => response,
                    Err(e) if self.is_image_request(&request.url) => {
                        match self.image_fallback(cache, &request.url).await {
                            Ok(Some(response)) => response,
                            Ok(None) => return Err(e),
                            Err(lookup) => {
                                log::warn!("Image fallback lookup failed: {lookup}");
                                return Err(e);
                            }
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        Ok(Some(RouteOutcome {
            strategy,
            response,
            deferred,
        }))
    }

    async fn network_then_cache(
        &self,
        request: &Request,
        cache: &str,
        deferred: &mut Deferred,
    ) -> Result<Response> {
        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.is_ok() && !self.is_image_request(&request.url) {
                    deferred.push(self.store(cache, request.url.as_str(), response.clone()));
                }
                Ok(response)
            }
            Err(e) => {
                log::debug!("Network failed for {}, trying {cache}: {e}", request.url);
                match self.caches.get(cache, request.url.as_str()).await {
                    Ok(Some(cached)) => Ok(cached),
                    Ok(None) => Err(e),
                    Err(read) => {
                        log::warn!("Cache read failed for {}: {read}", request.url);
                        Err(e)
                    }
                }
            }
        }
    }

    fn store(&self, cache: &str, key: &str, response: Response) -> BoxFuture<'static, ()> {
        let caches = Arc::clone(&self.caches);
        let cache = cache.to_string();
        let key = key.to_string();
        async move {
            if let Err(e) = caches.put(&cache, &key, response).await {
                log::warn!("Failed to cache {key} in {cache}: {e}");
            }
        }
        .boxed()
    }

    /// Drops the size and quality parameters of a resize request, leaving the
    /// prefix every cached variant of the same image starts with.
    fn strip_variant_params(&self, url: &Url) -> Url {
        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(name, _)| !self.config.image_variant_params.iter().any(|p| p.as_str() == &**name))
            .map(|(name, value)| (name.into_owned(), value.into_owned()))
            .collect();

        let mut base = url.clone();
        base.set_fragment(None);
        if kept.is_empty() {
            base.set_query(None);
        } else {
            base.query_pairs_mut().clear().extend_pairs(kept);
        }
        base
    }

    async fn image_fallback(&self, cache: &str, url: &Url) -> Result<Option<Response>> {
        let base = self.strip_variant_params(url);
        for key in self.caches.keys(cache).await? {
            let Ok(candidate) = Url::parse(&key) else {
                continue;
            };
            if self.is_own_host(&candidate)
                && candidate.path() == self.config.image_endpoint
                && key.starts_with(base.as_str())
            {
                log::debug!("Serving {key} in place of {url}");
                return self.caches.get(cache, &key).await;
            }
        }
        Ok(None)
    }
}
