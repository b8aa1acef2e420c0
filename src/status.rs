//! Download status counters.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

/// Phase of a reconciliation run, as broadcast to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Plan computed, work about to begin.
    Start,
    /// Periodic progress while work is in flight.
    Downloading,
    /// All work settled (including cancelled work).
    Done,
}

/// Snapshot of a run's counters.
///
/// Serializes to the wire shape the UI expects:
/// `{downloaded, download_failed, deleted, toDownload, toDelete}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Files downloaded and stored.
    pub downloaded: usize,
    /// Files that failed or were cancelled.
    pub download_failed: usize,
    /// Stale entries removed.
    pub deleted: usize,
    /// Files the plan set out to download.
    #[serde(rename = "toDownload")]
    pub to_download: usize,
    /// Entries the plan set out to delete.
    #[serde(rename = "toDelete")]
    pub to_delete: usize,
}

impl StatusCounts {
    /// Number of planned downloads that have not settled yet.
    #[must_use]
    pub const fn pending_downloads(&self) -> usize {
        self.to_download
            .saturating_sub(self.downloaded + self.download_failed)
    }
}

/// Internal helper for counting outcomes while downloads and deletions
/// complete in arbitrary order.
#[derive(Debug)]
pub struct StatusTracker {
    to_download: usize,
    to_delete: usize,
    downloaded: AtomicUsize,
    download_failed: AtomicUsize,
    deleted: AtomicUsize,
}

impl StatusTracker {
    /// Creates a tracker for a plan with the given totals.
    #[must_use]
    pub const fn new(to_download: usize, to_delete: usize) -> Self {
        Self {
            to_download,
            to_delete,
            downloaded: AtomicUsize::new(0),
            download_failed: AtomicUsize::new(0),
            deleted: AtomicUsize::new(0),
        }
    }

    /// Records a stored download.
    pub fn record_downloaded(&self) {
        self.downloaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed or cancelled download.
    pub fn record_failed(&self) {
        self.download_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a removed entry.
    pub fn record_deleted(&self) {
        self.deleted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current counts.
    #[must_use]
    pub fn snapshot(&self) -> StatusCounts {
        StatusCounts {
            downloaded: self.downloaded.load(Ordering::Relaxed),
            download_failed: self.download_failed.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            to_download: self.to_download,
            to_delete: self.to_delete,
        }
    }
}
