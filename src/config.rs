//! Configuration types for the offline worker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

/// Configuration for routing, caching, and offline downloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cache version. Bumping it retires every cache from older versions.
    pub version: u32,
    /// Origin the worker is installed on, e.g. `https://example.org`.
    pub origin: String,
    /// Foreign hosts whose responses may be cached (fonts, CDNs).
    pub cacheable_hosts: Vec<String>,
    /// App-shell files pre-cached on install and always network-then-cache.
    pub shell_files: Vec<String>,
    /// Path prefix of static build assets.
    pub static_prefix: String,
    /// Regexes over the path for build artifacts that must never be cached.
    pub network_only_patterns: Vec<String>,
    /// Path of the image-resize endpoint.
    pub image_endpoint: String,
    /// Query parameters that select an image variant (width, quality).
    pub image_variant_params: Vec<String>,
    /// Path of the offline manifest.
    pub manifest_path: String,
    /// Channel on which download status is broadcast.
    pub status_channel: String,
    /// Identifier of the platform background download job.
    pub background_fetch_id: String,
    /// Title shown on the background job once its files are stored.
    pub background_fetch_title: String,
    /// Interval between `downloading` status broadcasts, in milliseconds.
    pub status_interval_ms: u64,
    /// Number of concurrent offline downloads.
    pub concurrent_downloads: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: 1,
            origin: "http://localhost:3000".to_string(),
            cacheable_hosts: vec![
                "fonts.googleapis.com".to_string(),
                "fonts.gstatic.com".to_string(),
            ],
            shell_files: vec![
                "/".to_string(),
                "/sw/icon.png".to_string(),
                "/manifest.json".to_string(),
                "/favicon.ico".to_string(),
            ],
            static_prefix: "/_next/static/".to_string(),
            network_only_patterns: vec!["^/_next/static/chunks/pages/".to_string()],
            image_endpoint: "/_next/image".to_string(),
            image_variant_params: vec!["w".to_string(), "q".to_string()],
            manifest_path: "/offline-data.json".to_string(),
            status_channel: "offline-download".to_string(),
            background_fetch_id: "offline-download".to_string(),
            background_fetch_title: "Offline bundle is ready".to_string(),
            status_interval_ms: 1000,
            concurrent_downloads: 16,
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the origin the worker serves.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Sets the cache version.
    #[must_use]
    pub const fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the interval between `downloading` broadcasts.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the number of concurrent offline downloads.
    #[must_use]
    pub const fn with_concurrent_downloads(mut self, concurrent: usize) -> Self {
        self.concurrent_downloads = concurrent;
        self
    }

    /// Name of the versioned cache holding the app shell, static assets and the manifest.
    #[must_use]
    pub fn site_cache(&self) -> String {
        format!("site-{}", self.version)
    }

    /// Name of the versioned cache holding the offline bundle.
    #[must_use]
    pub fn offline_cache(&self) -> String {
        format!("offline-{}", self.version)
    }

    /// Interval between `downloading` broadcasts.
    #[must_use]
    pub const fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    /// Parses the configured origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin is not an absolute URL.
    pub fn origin_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.origin)?)
    }

    /// Resolves a site-relative path (or absolute URL) against the origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the origin or the path cannot be parsed.
    pub fn resolve(&self, path: &str) -> Result<Url> {
        Ok(self.origin_url()?.join(path)?)
    }
}

/// Locations of durable state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory holding the file-backed cache namespaces.
    pub cache_dir: PathBuf,
    /// JSON file holding the settings table.
    pub settings_path: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let data_dir = Self::data_dir();
        Self {
            cache_dir: data_dir.join("caches"),
            settings_path: data_dir.join("settings.json"),
        }
    }
}

impl PathConfig {
    /// Returns the directory where durable state lives.
    ///
    /// Uses `STATE_DIRECTORY` (set by systemd when `StateDirectory=` is configured),
    /// falling back to `$XDG_DATA_HOME/offline-sw`.
    #[must_use]
    pub fn data_dir() -> PathBuf {
        std::env::var("STATE_DIRECTORY").map_or_else(
            |_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("offline-sw")
            },
            PathBuf::from,
        )
    }
}

/// Complete application configuration combining worker and path settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Worker configuration.
    pub worker: WorkerConfig,
    /// Path configuration.
    pub paths: PathConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a TOML file, or defaults if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Default location of the config file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("offline-sw")
            .join("config.toml")
    }
}
