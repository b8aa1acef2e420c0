//! Offline bundle reconciliation.
//!
//! A run diffs the files the manifest asks for against what the offline cache
//! holds, downloads what is missing, evicts what is stale, and broadcasts
//! progress. Runs are single-flight: starting one cancels whichever run was
//! active. Nothing is rolled back on cancellation; the next run simply diffs
//! against whatever the cache holds by then.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::{StreamExt, stream};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::cache::{CacheStore, path_and_query};
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::http::{CacheMode, Fetcher, Request};
use crate::manifest::ManifestFetcher;
use crate::status::{DownloadStatus, StatusCounts, StatusTracker};

/// What a run will do: the two-way difference of desired and cached files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    /// Desired files missing from the cache, in manifest order.
    pub to_download: Vec<String>,
    /// Cached files no longer desired.
    pub to_delete: Vec<String>,
}

impl ReconciliationPlan {
    /// Computes the plan from desired and cached `pathname + search` sets.
    #[must_use]
    pub fn compute(desired: &[String], cached: &[String]) -> Self {
        let desired_set: HashSet<&str> = desired.iter().map(String::as_str).collect();
        let cached_set: HashSet<&str> = cached.iter().map(String::as_str).collect();

        let mut seen = HashSet::new();
        let to_download = desired
            .iter()
            .filter(|f| !cached_set.contains(f.as_str()) && seen.insert(f.as_str()))
            .cloned()
            .collect();
        let mut seen = HashSet::new();
        let to_delete = cached
            .iter()
            .filter(|f| !desired_set.contains(f.as_str()) && seen.insert(f.as_str()))
            .cloned()
            .collect();

        Self {
            to_download,
            to_delete,
        }
    }

    /// Returns true if the cache already matches the manifest.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_download.is_empty() && self.to_delete.is_empty()
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// The plan the run executed.
    pub plan: ReconciliationPlan,
    /// Final counters, identical to the `done` broadcast.
    pub counts: StatusCounts,
    /// Whether the run was cancelled before it finished.
    pub cancelled: bool,
}

/// The active run's cancellation handle.
struct DownloadSession {
    id: Uuid,
    token: CancellationToken,
}

#[derive(Default)]
struct Sessions {
    active: Option<DownloadSession>,
    // Every run still executing, superseded ones included, keyed to a token
    // that is cancelled once the run has stopped touching the cache.
    running: HashMap<Uuid, CancellationToken>,
}

/// Held by a run for its whole duration. Dropping it detaches the session.
struct SessionGuard<'a> {
    sessions: &'a Mutex<Sessions>,
    id: Uuid,
    token: CancellationToken,
    finished: CancellationToken,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if sessions.active.as_ref().is_some_and(|s| s.id == self.id) {
            sessions.active = None;
        }
        sessions.running.remove(&self.id);
        self.finished.cancel();
    }
}

/// Periodic `downloading` broadcast. Dropping it stops the timer.
struct StatusTicker {
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl StatusTicker {
    fn spawn(
        broadcaster: Arc<Broadcaster>,
        channel: String,
        tracker: Arc<StatusTracker>,
        period: Duration,
    ) -> Self {
        let stop = CancellationToken::new();
        let stopped = stop.clone();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = stopped.cancelled() => break,
                    _ = interval.tick() => {
                        broadcaster.post_status(&channel, DownloadStatus::Downloading, tracker.snapshot());
                    }
                }
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stops the timer and waits until it can no longer post.
    async fn stop(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for StatusTicker {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Brings the offline cache in line with the manifest.
pub struct Reconciler {
    config: Arc<WorkerConfig>,
    caches: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    manifests: Arc<ManifestFetcher>,
    broadcaster: Arc<Broadcaster>,
    sessions: Mutex<Sessions>,
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(
        config: Arc<WorkerConfig>,
        caches: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        manifests: Arc<ManifestFetcher>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            config,
            caches,
            fetcher,
            manifests,
            broadcaster,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancels and detaches the active session, then installs a new one.
    fn begin_session(&self) -> SessionGuard<'_> {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let finished = CancellationToken::new();

        let mut sessions = self.lock_sessions();
        if let Some(previous) = sessions.active.replace(DownloadSession {
            id,
            token: token.clone(),
        }) {
            log::info!("Download session {} superseded by {id}", previous.id);
            previous.token.cancel();
        }
        sessions.running.insert(id, finished.clone());
        drop(sessions);

        SessionGuard {
            sessions: &self.sessions,
            id,
            token,
            finished,
        }
    }

    /// Returns true while a run holds the active session.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_sessions().active.is_some()
    }

    /// Cancels the active session, if any. Does not wait for it to wind down.
    /// Returns true if a session was cancelled.
    pub fn cancel(&self) -> bool {
        let active = self.lock_sessions().active.take();
        active.is_some_and(|session| {
            log::info!("Cancelling download session {}", session.id);
            session.token.cancel();
            true
        })
    }

    /// Cancels the active session and waits until every run, superseded ones
    /// included, has stopped writing to the offline cache.
    pub async fn cancel_and_wait(&self) {
        self.cancel();
        let running: Vec<CancellationToken> = self.lock_sessions().running.values().cloned().collect();
        for finished in running {
            finished.cancelled().await;
        }
    }

    /// Lists the offline cache as `pathname + search`, mapped to the keys
    /// that normalize to it.
    async fn cached_entries(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let keys = self.caches.keys(&self.config.offline_cache()).await?;
        let mut entries: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in keys {
            match Url::parse(&key) {
                Ok(url) => entries.entry(path_and_query(&url)).or_default().push(key),
                Err(e) => log::warn!("Ignoring unparseable cache key {key}: {e}"),
            }
        }
        Ok(entries)
    }

    /// Returns the files in the offline cache as `pathname + search`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be listed.
    pub async fn cached_files(&self) -> Result<Vec<String>> {
        Ok(self.cached_entries().await?.into_keys().collect())
    }

    /// Runs one reconciliation pass, superseding any active run.
    ///
    /// Individual download or delete failures are counted, not returned.
    /// Cancellation is not an error: the run still broadcasts `done` and
    /// returns a report with `cancelled` set.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be obtained or the offline
    /// cache cannot be listed. Nothing is broadcast in that case.
    pub async fn run(&self, force_refresh: bool) -> Result<ReconcileReport> {
        let session = self.begin_session();

        let manifest = self
            .manifests
            .fetch_unless_cancelled(force_refresh, &session.token)
            .await?;
        let desired = manifest.desired_files();
        log::debug!("Files from offline manifest: {desired:?}");

        let cached = self.cached_entries().await?;
        let cached_files: Vec<String> = cached.keys().cloned().collect();
        log::debug!("Files in cache now: {cached_files:?}");

        // A run superseded before planning only winds down: its manifest may
        // already be stale and must not drive downloads or deletions.
        let plan = if session.token.is_cancelled() {
            log::info!("Download session {} superseded before planning", session.id);
            ReconciliationPlan::default()
        } else {
            ReconciliationPlan::compute(&desired, &cached_files)
        };
        log::info!(
            "Offline bundle: {} to download, {} to delete",
            plan.to_download.len(),
            plan.to_delete.len()
        );

        let channel = self.config.status_channel.clone();
        let tracker = Arc::new(StatusTracker::new(plan.to_download.len(), plan.to_delete.len()));
        self.broadcaster
            .post_status(&channel, DownloadStatus::Start, tracker.snapshot());
        let ticker = StatusTicker::spawn(
            Arc::clone(&self.broadcaster),
            channel.clone(),
            Arc::clone(&tracker),
            self.config.status_interval(),
        );

        tokio::join!(
            self.download_all(&plan.to_download, &session.token, &tracker),
            self.delete_all(&plan.to_delete, &cached, &session.token, &tracker),
        );

        let cancelled = session.token.is_cancelled();
        drop(session);
        ticker.stop().await;

        let counts = tracker.snapshot();
        self.broadcaster
            .post_status(&channel, DownloadStatus::Done, counts);
        log::info!(
            "Offline bundle {}: {} downloaded, {} failed, {} deleted",
            if cancelled { "cancelled" } else { "done" },
            counts.downloaded,
            counts.download_failed,
            counts.deleted
        );

        Ok(ReconcileReport {
            plan,
            counts,
            cancelled,
        })
    }

    async fn download_all(&self, files: &[String], token: &CancellationToken, tracker: &StatusTracker) {
        let cache = self.config.offline_cache();
        stream::iter(files)
            .for_each_concurrent(self.config.concurrent_downloads.max(1), |path| {
                let cache = cache.as_str();
                async move {
                    match self.download_one(cache, path, token).await {
                        Ok(()) => tracker.record_downloaded(),
                        Err(e) if e.is_cancelled() => {
                            log::debug!("Download cancelled: {path}");
                            tracker.record_failed();
                        }
                        Err(e) => {
                            log::error!("Download failed: {path}: {e}");
                            tracker.record_failed();
                        }
                    }
                }
            })
            .await;
    }

    /// Fetches one file without touching HTTP caches and stores it.
    async fn download_one(&self, cache: &str, path: &str, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let url = self.config.resolve(path)?;
        let request = Request::new(url).with_cache(CacheMode::NoStore);

        let response = tokio::select! {
            biased;
            () = token.cancelled() => return Err(Error::Cancelled),
            res = self.fetcher.fetch(&request) => res?,
        };
        let response = response.error_for_status()?;

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.caches.put(cache, request.url.as_str(), response).await
    }

    async fn delete_all(
        &self,
        files: &[String],
        cached: &BTreeMap<String, Vec<String>>,
        token: &CancellationToken,
        tracker: &StatusTracker,
    ) {
        let cache = self.config.offline_cache();
        stream::iter(files)
            .for_each_concurrent(None, |path| {
                let cache = cache.as_str();
                async move {
                    let keys = cached.get(path).map(Vec::as_slice).unwrap_or_default();
                    let mut ok = true;
                    for key in keys {
                        if token.is_cancelled() {
                            log::debug!("Delete cancelled: {path}");
                            return;
                        }
                        if let Err(e) = self.caches.delete(cache, key).await {
                            log::warn!("Failed to delete {key}: {e}");
                            ok = false;
                        }
                    }
                    if ok {
                        tracker.record_deleted();
                    }
                }
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ChannelMessage;
    use crate::cache::MemoryCacheStore;
    use crate::http::Response;
    use crate::manifest::OfflineManifest;
    use crate::settings::Settings;
    use crate::testing::{MockFetcher, manifest_json};
    use proptest::prelude::*;
    use tokio::sync::broadcast::Receiver;
    use tokio::sync::broadcast::error::TryRecvError;

    const ORIGIN: &str = "https://example.org";
    const MANIFEST_URL: &str = "https://example.org/offline-data.json";

    struct Harness {
        reconciler: Arc<Reconciler>,
        fetcher: Arc<MockFetcher>,
        caches: Arc<MemoryCacheStore>,
        broadcaster: Arc<Broadcaster>,
    }

    impl Harness {
        fn set_manifest(&self, pages: Vec<(&str, Vec<&str>)>) {
            for (url, files) in &pages {
                for path in std::iter::once(url).chain(files) {
                    let full = format!("{ORIGIN}{path}");
                    self.fetcher.respond(&full, 200, format!("body of {path}"));
                }
            }
            self.fetcher.respond(MANIFEST_URL, 200, manifest_json(pages));
        }

        fn subscribe(&self) -> Receiver<ChannelMessage> {
            self.broadcaster.subscribe("offline-download")
        }

        async fn cached_sorted(&self) -> Vec<String> {
            let mut files = self.reconciler.cached_files().await.unwrap();
            files.sort();
            files
        }
    }

    async fn harness(pages: Vec<(&str, Vec<&str>)>) -> Harness {
        let config = Arc::new(WorkerConfig::new().with_origin(ORIGIN));
        let caches = Arc::new(MemoryCacheStore::new());
        let fetcher = Arc::new(MockFetcher::new());
        let settings = Arc::new(Settings::in_memory(1).await.unwrap());
        let broadcaster = Arc::new(Broadcaster::new());
        let manifests = Arc::new(ManifestFetcher::new(
            config.clone(),
            caches.clone(),
            fetcher.clone(),
            settings,
        ));
        let reconciler = Arc::new(Reconciler::new(
            config,
            caches.clone(),
            fetcher.clone(),
            manifests,
            broadcaster.clone(),
        ));
        let harness = Harness {
            reconciler,
            fetcher,
            caches,
            broadcaster,
        };
        harness.set_manifest(pages);
        harness
    }

    async fn next_status(rx: &mut Receiver<ChannelMessage>) -> (DownloadStatus, StatusCounts) {
        let message = rx.recv().await.unwrap();
        let status = message.as_status().unwrap();
        (status.status, status.data)
    }

    async fn wait_for_done(rx: &mut Receiver<ChannelMessage>) -> StatusCounts {
        loop {
            let (status, counts) = next_status(rx).await;
            if status == DownloadStatus::Done {
                return counts;
            }
            assert_eq!(status, DownloadStatus::Downloading);
        }
    }

    #[test]
    fn plan_is_two_way_difference() {
        let desired = vec!["/".to_string(), "/a".to_string(), "/b".to_string()];
        let cached = vec!["/b".to_string(), "/old".to_string()];
        let plan = ReconciliationPlan::compute(&desired, &cached);
        assert_eq!(plan.to_download, vec!["/", "/a"]);
        assert_eq!(plan.to_delete, vec!["/old"]);
        assert!(!plan.is_empty());
        assert!(ReconciliationPlan::compute(&cached, &cached).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_run_downloads_everything() {
        let h = harness(vec![("/", vec!["/app.css", "/logo.png"]), ("/about", vec!["/app.css"])]).await;
        let mut rx = h.subscribe();

        let report = h.reconciler.run(true).await.unwrap();
        assert!(!report.cancelled);
        assert_eq!(report.plan.to_download.len(), 4);
        assert_eq!(report.counts.downloaded, 4);
        assert_eq!(report.counts.download_failed, 0);
        assert_eq!(h.cached_sorted().await, vec!["/", "/about", "/app.css", "/logo.png"]);

        let (status, counts) = next_status(&mut rx).await;
        assert_eq!(status, DownloadStatus::Start);
        assert_eq!(counts.to_download, 4);
        assert_eq!(counts.downloaded, 0);
        assert_eq!(wait_for_done(&mut rx).await, report.counts);

        let stored = h
            .caches
            .get("offline-1", "https://example.org/logo.png")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.body, "body of /logo.png");
        assert_eq!(
            h.fetcher.last_cache_mode("https://example.org/logo.png"),
            Some(CacheMode::NoStore)
        );
        assert!(!h.reconciler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_a_no_op() {
        let h = harness(vec![("/", vec!["/a.js"])]).await;
        h.reconciler.run(true).await.unwrap();

        let report = h.reconciler.run(false).await.unwrap();
        assert!(report.plan.is_empty());
        assert_eq!(report.counts, StatusCounts::default());
        assert_eq!(h.fetcher.calls("https://example.org/a.js"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entries_are_evicted() {
        let h = harness(vec![("/", vec!["/a.js"])]).await;
        h.caches
            .put("offline-1", "https://example.org/gone?v=2", Response::new("", 200, "old"))
            .await
            .unwrap();
        h.caches
            .put("offline-1", "https://example.org/a.js", Response::new("", 200, "kept"))
            .await
            .unwrap();

        let report = h.reconciler.run(true).await.unwrap();
        assert_eq!(report.plan.to_delete, vec!["/gone?v=2"]);
        assert_eq!(report.plan.to_download, vec!["/"]);
        assert_eq!(report.counts.deleted, 1);
        assert_eq!(h.cached_sorted().await, vec!["/", "/a.js"]);
        assert_eq!(h.fetcher.calls("https://example.org/a.js"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_counted_not_fatal() {
        let h = harness(vec![("/", vec!["/missing.png", "/offline.png", "/ok.png"])]).await;
        h.fetcher.respond("https://example.org/missing.png", 404, "nope");
        h.fetcher.fail("https://example.org/offline.png");
        let mut rx = h.subscribe();

        let report = h.reconciler.run(true).await.unwrap();
        assert_eq!(report.counts.downloaded, 2);
        assert_eq!(report.counts.download_failed, 2);
        assert_eq!(h.cached_sorted().await, vec!["/", "/ok.png"]);
        assert_eq!(wait_for_done(&mut rx).await.download_failed, 2);

        // A retry only re-attempts what is still missing.
        h.fetcher.respond("https://example.org/missing.png", 200, "found");
        let retry = h.reconciler.run(false).await.unwrap();
        assert_eq!(retry.plan.to_download, vec!["/missing.png", "/offline.png"]);
        assert_eq!(retry.counts.downloaded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_status_until_cancelled_then_done_and_silence() {
        let h = harness(vec![("/", vec!["/slow.bin"])]).await;
        h.fetcher.hang("https://example.org/slow.bin");
        let mut rx = h.subscribe();

        let reconciler = h.reconciler.clone();
        let run = tokio::spawn(async move { reconciler.run(true).await });

        assert_eq!(next_status(&mut rx).await.0, DownloadStatus::Start);
        let (status, counts) = next_status(&mut rx).await;
        assert_eq!(status, DownloadStatus::Downloading);
        assert_eq!(counts.downloaded, 1);
        assert_eq!(counts.pending_downloads(), 1);
        assert!(h.reconciler.is_running());

        assert!(h.reconciler.cancel());
        let done = wait_for_done(&mut rx).await;
        assert_eq!(done.downloaded, 1);
        assert_eq!(done.download_failed, 1);

        let report = run.await.unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.counts, done);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn new_run_supersedes_active_run() {
        let h = harness(vec![("/", vec!["/big.bin"])]).await;
        h.fetcher.hang("https://example.org/big.bin");
        let mut rx = h.subscribe();

        let reconciler = h.reconciler.clone();
        let first = tokio::spawn(async move { reconciler.run(true).await });
        assert_eq!(next_status(&mut rx).await.0, DownloadStatus::Start);

        h.fetcher.respond("https://example.org/big.bin", 200, "big");
        let second = h.reconciler.run(false).await.unwrap();
        assert!(!second.cancelled);

        let first = first.await.unwrap().unwrap();
        assert!(first.cancelled);
        // Only the hanging file was in flight when the first run was cancelled.
        assert_eq!(first.counts.download_failed, 1);
        assert!(first.counts.downloaded <= first.counts.to_download);

        assert_eq!(h.cached_sorted().await, vec!["/", "/big.bin"]);
        assert!(!h.reconciler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn run_superseded_before_planning_leaves_newer_bundle_intact() {
        let h = harness(vec![("/", vec!["/old"])]).await;
        h.reconciler.run(true).await.unwrap();
        assert_eq!(h.cached_sorted().await, vec!["/", "/old"]);

        let gate = h
            .fetcher
            .gate(MANIFEST_URL, 200, manifest_json(vec![("/", vec!["/old"])]));
        let reconciler = h.reconciler.clone();
        let stale = tokio::spawn(async move { reconciler.run(true).await });
        while h.fetcher.calls(MANIFEST_URL) < 2 {
            tokio::task::yield_now().await;
        }

        h.set_manifest(vec![("/", vec!["/new"])]);
        let fresh = h.reconciler.run(true).await.unwrap();
        assert!(!fresh.cancelled);
        assert_eq!(h.cached_sorted().await, vec!["/", "/new"]);

        let mut rx = h.subscribe();
        gate.add_permits(1);
        let stale = stale.await.unwrap().unwrap();
        assert!(stale.cancelled);
        assert!(stale.plan.is_empty());
        assert_eq!(stale.counts, StatusCounts::default());

        // A superseded run still announces itself and finishes.
        assert_eq!(next_status(&mut rx).await.0, DownloadStatus::Start);
        assert_eq!(wait_for_done(&mut rx).await, StatusCounts::default());

        assert_eq!(h.cached_sorted().await, vec!["/", "/new"]);
        assert_eq!(h.fetcher.calls("https://example.org/old"), 1);
        let stored: OfflineManifest = h
            .caches
            .get("site-1", MANIFEST_URL)
            .await
            .unwrap()
            .unwrap()
            .json()
            .unwrap();
        assert_eq!(stored.desired_files(), vec!["/", "/new"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_wait_drains_superseded_runs() {
        let h = harness(vec![("/", vec!["/a.bin"])]).await;
        h.fetcher.hang("https://example.org/a.bin");
        let mut rx = h.subscribe();

        let r1 = h.reconciler.clone();
        let first = tokio::spawn(async move { r1.run(true).await });
        assert_eq!(next_status(&mut rx).await.0, DownloadStatus::Start);

        h.reconciler.cancel_and_wait().await;
        assert!(!h.reconciler.is_running());
        assert!(first.await.unwrap().unwrap().cancelled);
    }

    #[tokio::test]
    async fn cancel_without_session_is_a_no_op() {
        let h = harness(vec![]).await;
        assert!(!h.reconciler.cancel());
        h.reconciler.cancel_and_wait().await;
    }

    #[tokio::test]
    async fn manifest_failure_is_an_error_and_broadcasts_nothing() {
        let h = harness(vec![]).await;
        h.fetcher.fail(MANIFEST_URL);
        let mut rx = h.subscribe();

        assert!(h.reconciler.run(true).await.is_err());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(!h.reconciler.is_running());
    }

    proptest! {
        #[test]
        fn plan_applied_to_cache_yields_desired(
            desired in prop::collection::vec("/[a-d]{1,2}", 0..8),
            cached in prop::collection::vec("/[a-d]{1,2}", 0..8),
        ) {
            let plan = ReconciliationPlan::compute(&desired, &cached);
            let mut result: HashSet<&String> = cached.iter().collect();
            for f in &plan.to_delete {
                result.remove(f);
            }
            result.extend(plan.to_download.iter());
            let expected: HashSet<&String> = desired.iter().collect();
            prop_assert_eq!(result, expected);
        }
    }
}
