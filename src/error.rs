//! Error types for the offline-sw library.

use thiserror::Error;

/// Errors that can occur while routing, caching, or reconciling.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The network answered, but not with a success status.
    #[error("Request to {url} failed with status {status}")]
    Status {
        /// URL that was requested.
        url: String,
        /// HTTP status code returned.
        status: u16,
    },

    /// The network could not be reached at all.
    #[error("Network error: {0}")]
    Network(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// A URL or path could not be parsed.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// A network-only pattern is not a valid regex.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Cache or settings storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored settings were written by a newer schema version.
    #[error("Settings version {stored} is newer than supported version {supported}")]
    VersionDowngrade {
        /// Version found on disk.
        stored: u32,
        /// Version this build understands.
        supported: u32,
    },

    /// Operation was cancelled by a newer download session or by disabling offline mode.
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Returns true if this error represents a cancellation rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A specialized `Result` type for offline-sw operations.
pub type Result<T> = std::result::Result<T, Error>;
