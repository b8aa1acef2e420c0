//! Completion of platform-managed background download jobs.
//!
//! The platform keeps downloading after every window of the site is closed
//! and later hands the finished job to the worker. Its records are committed
//! to the offline cache before the event is allowed to settle, all or none:
//! if any record fails to store, the ones already written are deleted again.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;

use crate::broadcast::{Broadcaster, ChannelMessage};
use crate::cache::CacheStore;
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::http::{Request, Response};
use crate::platform::Platform;

/// One downloaded file of a background job.
#[derive(Debug, Clone)]
pub struct BackgroundFetchRecord {
    /// The request the job made.
    pub request: Request,
    /// The response it received.
    pub response: Response,
}

/// A finished background download job as handed over by the platform.
#[async_trait]
pub trait BackgroundFetchRegistration: Send + Sync {
    /// Job id chosen when the job was started.
    fn id(&self) -> &str;

    /// Every record of the job, with its response fully available.
    async fn match_all(&self) -> Result<Vec<BackgroundFetchRecord>>;
}

/// Handles success, failure and click events of background download jobs.
pub struct BackgroundFetchBridge {
    config: Arc<WorkerConfig>,
    caches: Arc<dyn CacheStore>,
    broadcaster: Arc<Broadcaster>,
    platform: Arc<dyn Platform>,
}

impl BackgroundFetchBridge {
    /// Creates a bridge.
    #[must_use]
    pub fn new(
        config: Arc<WorkerConfig>,
        caches: Arc<dyn CacheStore>,
        broadcaster: Arc<Broadcaster>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            config,
            caches,
            broadcaster,
            platform,
        }
    }

    /// Commits a successful job to the offline cache, then announces
    /// `{stored: true}` on the job's channel and updates the job UI.
    ///
    /// Jobs other than the offline download are ignored. Returns the number
    /// of records stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the records cannot be read or any of them cannot
    /// be stored. Records stored before the failure are deleted again and
    /// nothing is announced.
    pub async fn on_success(&self, registration: &dyn BackgroundFetchRegistration) -> Result<usize> {
        let id = registration.id();
        if id != self.config.background_fetch_id {
            log::debug!("Ignoring background fetch {id}");
            return Ok(0);
        }

        let records = registration.match_all().await?;
        let cache = self.config.offline_cache();
        let results = join_all(records.into_iter().map(|record| {
            let cache = cache.as_str();
            async move {
                let key = record.request.url.to_string();
                let result = self.caches.put(cache, &key, record.response).await;
                (key, result)
            }
        }))
        .await;

        let (written, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(|(_, r)| r.is_ok());
        if let Some((key, Err(e))) = failed.into_iter().next() {
            log::warn!("Background fetch {id}: failed to store {key}: {e}, rolling back");
            for (key, _) in &written {
                if let Err(e) = self.caches.delete(&cache, key).await {
                    log::warn!("Failed to roll back {key}: {e}");
                }
            }
            return Err(e);
        }
        let stored = written.len();
        log::info!("Background fetch {id}: stored {stored} files");

        if let Err(e) = self
            .platform
            .update_background_fetch_ui(id, &self.config.background_fetch_title)
            .await
        {
            log::warn!("Failed to update background fetch UI: {e}");
        }
        self.broadcaster.post(id, ChannelMessage::Stored { stored: true });

        Ok(stored)
    }

    /// A job failed. Nothing is cached.
    pub fn on_failure(&self, id: &str) {
        log::warn!("Background fetch {id} failed");
    }

    /// The user clicked the job's UI: open the site root.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin is invalid or the window cannot be opened.
    pub async fn on_click(&self, id: &str) -> Result<()> {
        log::debug!("Background fetch {id} clicked");
        let root = self.config.resolve("/")?;
        self.platform.open_window(&root).await
    }
}
