//! The worker: lifecycle hooks, UI commands, request interception and
//! background job events, wired to one shared set of caches and settings.

use std::sync::Arc;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::background::{BackgroundFetchBridge, BackgroundFetchRegistration};
use crate::broadcast::{Broadcaster, ChannelMessage};
use crate::cache::{CacheStore, FsCacheStore};
use crate::config::{AppConfig, WorkerConfig};
use crate::error::{Error, Result};
use crate::http::{Fetcher, Request, ReqwestFetcher, Response};
use crate::manifest::ManifestFetcher;
use crate::platform::Platform;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::router::{CacheRouter, RouteOutcome};
use crate::settings::{JsonFileBackend, Settings};

/// A message from the UI, keyed by `action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Command {
    /// Turn offline mode on, download the bundle, reload open windows.
    EnableOffline,
    /// Resume the download if offline mode is on.
    ContinueDownload,
    /// Turn offline mode off and drop the bundle.
    DisableOffline,
}

/// The offline-caching engine of one site.
pub struct OfflineWorker {
    config: Arc<WorkerConfig>,
    caches: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    settings: Arc<Settings>,
    broadcaster: Arc<Broadcaster>,
    platform: Arc<dyn Platform>,
    router: CacheRouter,
    reconciler: Arc<Reconciler>,
    background: BackgroundFetchBridge,
}

impl OfflineWorker {
    /// Wires a worker from its ports. `settings` must already be open.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured origin or network-only patterns
    /// are invalid.
    pub fn new(
        config: WorkerConfig,
        caches: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        settings: Settings,
        platform: Arc<dyn Platform>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let settings = Arc::new(settings);
        let broadcaster = Arc::new(Broadcaster::new());

        let router = CacheRouter::new(
            Arc::clone(&config),
            Arc::clone(&caches),
            Arc::clone(&fetcher),
            Arc::clone(&settings),
        )?;
        let manifests = Arc::new(ManifestFetcher::new(
            Arc::clone(&config),
            Arc::clone(&caches),
            Arc::clone(&fetcher),
            Arc::clone(&settings),
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&config),
            Arc::clone(&caches),
            Arc::clone(&fetcher),
            manifests,
            Arc::clone(&broadcaster),
        ));
        let background = BackgroundFetchBridge::new(
            Arc::clone(&config),
            Arc::clone(&caches),
            Arc::clone(&broadcaster),
            Arc::clone(&platform),
        );

        Ok(Self {
            config,
            caches,
            fetcher,
            settings,
            broadcaster,
            platform,
            router,
            reconciler,
            background,
        })
    }

    /// Opens a worker backed by the file cache store, the JSON settings file
    /// and the real network.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built, the settings
    /// cannot be opened, or the configuration is invalid.
    pub async fn open(app: &AppConfig, platform: Arc<dyn Platform>) -> Result<Self> {
        let caches = Arc::new(FsCacheStore::new(&app.paths.cache_dir));
        let fetcher = Arc::new(ReqwestFetcher::new()?);
        let settings = Settings::open(
            JsonFileBackend::new(&app.paths.settings_path),
            app.worker.version,
        )
        .await?;
        Self::new(app.worker.clone(), caches, fetcher, settings, platform)
    }

    /// Worker configuration.
    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// The settings store.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The cache store.
    #[must_use]
    pub fn caches(&self) -> &dyn CacheStore {
        self.caches.as_ref()
    }

    /// The reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// The request router.
    #[must_use]
    pub const fn router(&self) -> &CacheRouter {
        &self.router
    }

    /// Subscribes to download status broadcasts.
    #[must_use]
    pub fn subscribe_status(&self) -> broadcast::Receiver<ChannelMessage> {
        self.broadcaster.subscribe(&self.config.status_channel)
    }

    /// Subscribes to any named channel, such as a background job's.
    #[must_use]
    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ChannelMessage> {
        self.broadcaster.subscribe(channel)
    }

    /// Pre-caches the app shell, then activates without waiting.
    ///
    /// Every shell file is fetched before any is stored: if one fails,
    /// nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error if any shell file cannot be fetched or stored.
    pub async fn install(&self) -> Result<()> {
        let requests = self
            .config
            .shell_files
            .iter()
            .map(|path| Ok(Request::new(self.config.resolve(path)?)))
            .collect::<Result<Vec<_>>>()?;

        let responses = try_join_all(
            requests
                .iter()
                .map(|request| async move { self.fetcher.fetch(request).await?.error_for_status() }),
        )
        .await?;

        let cache = self.config.site_cache();
        try_join_all(
            requests
                .iter()
                .zip(responses)
                .map(|(request, response)| self.caches.put(&cache, request.url.as_str(), response)),
        )
        .await?;
        log::info!("Pre-cached {} shell files", requests.len());

        self.platform.skip_waiting().await
    }

    /// Deletes every cache that is not current, upgrades the settings store
    /// and takes control of open views. Returns the purged cache names.
    ///
    /// # Errors
    ///
    /// Returns an error if a cache cannot be listed or deleted, the settings
    /// upgrade fails, or clients cannot be claimed.
    pub async fn activate(&self) -> Result<Vec<String>> {
        let current = [self.config.site_cache(), self.config.offline_cache()];
        let purge = async {
            let stale: Vec<String> = self
                .caches
                .cache_names()
                .await?
                .into_iter()
                .filter(|name| !current.contains(name))
                .collect();
            try_join_all(stale.iter().map(|name| {
                log::info!("Deleting stale cache {name}");
                self.caches.delete_cache(name)
            }))
            .await?;
            Ok::<_, Error>(stale)
        };

        let (purged, (), ()) = tokio::try_join!(
            purge,
            self.settings.upgrade(),
            self.platform.claim_clients()
        )?;
        Ok(purged)
    }

    /// Handles a UI command. Returns the report of the reconciliation it ran,
    /// if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the setting cannot be persisted, the manifest
    /// cannot be obtained, or the offline cache cannot be dropped.
    pub async fn handle_command(&self, command: Command) -> Result<Option<ReconcileReport>> {
        log::debug!("Command: {command:?}");
        match command {
            Command::EnableOffline => self.enable_offline().await.map(Some),
            Command::ContinueDownload => {
                if self.settings.is_offline_enabled().await {
                    self.reconciler.run(false).await.map(Some)
                } else {
                    log::debug!("Offline mode is off, not continuing download");
                    Ok(None)
                }
            }
            Command::DisableOffline => self.disable_offline().await.map(|()| None),
        }
    }

    async fn enable_offline(&self) -> Result<ReconcileReport> {
        self.settings.set_offline_enabled(true).await?;
        let (report, reloaded) = tokio::join!(self.reconciler.run(true), self.platform.reload_windows());
        match reloaded {
            Ok(count) => log::debug!("Reloaded {count} windows"),
            Err(e) => log::warn!("Failed to reload windows: {e}"),
        }
        report
    }

    async fn disable_offline(&self) -> Result<()> {
        self.settings.set_offline_enabled(false).await?;
        self.reconciler.cancel_and_wait().await;
        if self.caches.delete_cache(&self.config.offline_cache()).await? {
            log::info!("Offline bundle deleted");
        }
        Ok(())
    }

    /// Serves an intercepted request. Cache writes are handed to the runtime.
    /// Returns `None` if the request is not intercepted.
    ///
    /// # Errors
    ///
    /// Returns the network error when no cached copy can stand in.
    pub async fn fetch(&self, request: &Request) -> Result<Option<Response>> {
        Ok(self.router.handle(request).await?.map(|outcome| {
            drop(outcome.deferred.spawn());
            outcome.response
        }))
    }

    /// Serves an intercepted request, leaving the cache writes to the caller.
    ///
    /// # Errors
    ///
    /// Returns the network error when no cached copy can stand in.
    pub async fn fetch_deferred(&self, request: &Request) -> Result<Option<RouteOutcome>> {
        self.router.handle(request).await
    }

    /// A background download job finished.
    ///
    /// # Errors
    ///
    /// Returns an error if its records cannot be committed.
    pub async fn on_background_fetch_success(
        &self,
        registration: &dyn BackgroundFetchRegistration,
    ) -> Result<usize> {
        self.background.on_success(registration).await
    }

    /// A background download job failed.
    pub fn on_background_fetch_failure(&self, id: &str) {
        self.background.on_failure(id);
    }

    /// The user clicked a background download job.
    ///
    /// # Errors
    ///
    /// Returns an error if the window cannot be opened.
    pub async fn on_background_fetch_click(&self, id: &str) -> Result<()> {
        self.background.on_click(id).await
    }
}
