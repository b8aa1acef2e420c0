//! Human-readable rendering of sizes and download progress.

use crate::broadcast::StatusMessage;
use crate::status::DownloadStatus;

/// Formats a byte count as a human-readable string (B, KB, MB, GB).
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Formats a status broadcast as one log line, e.g.
/// `downloading: 3/10 downloaded, 1 failed, 2/2 deleted`.
#[must_use]
pub fn format_status(message: &StatusMessage) -> String {
    let phase = match message.status {
        DownloadStatus::Start => "start",
        DownloadStatus::Downloading => "downloading",
        DownloadStatus::Done => "done",
    };
    let data = &message.data;
    format!(
        "{phase}: {}/{} downloaded, {} failed, {}/{} deleted",
        data.downloaded, data.to_download, data.download_failed, data.deleted, data.to_delete
    )
}
