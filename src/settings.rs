//! Durable key/value settings that survive worker restarts.
//!
//! The table is versioned. Opening it runs the schema upgrade once, before
//! any read or write, so holding a [`Settings`] means the upgrade is done.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Whether the user opted into the offline bundle.
pub const ENABLE_OFFLINE: &str = "enable-offline";

/// When the offline manifest was last fetched from the network.
pub const LAST_CHECK_UPDATES: &str = "last-check-updates";

/// A single settings row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    /// Unique key.
    pub key: String,
    /// Arbitrary JSON value.
    pub value: Value,
    /// Time of the last `set`. Seeded defaults have none.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The persisted table, keyed by setting name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsTable {
    /// Schema version the table was last upgraded to.
    pub version: u32,
    /// Rows keyed by [`Setting::key`].
    pub rows: BTreeMap<String, Setting>,
}

impl SettingsTable {
    /// Inserts any missing default rows. Existing rows are left untouched.
    fn seed_defaults(&mut self) {
        let defaults = [
            (ENABLE_OFFLINE, Value::Bool(false)),
            (LAST_CHECK_UPDATES, Value::Null),
        ];
        for (key, value) in defaults {
            self.rows.entry(key.to_string()).or_insert_with(|| Setting {
                key: key.to_string(),
                value,
                updated_at: None,
            });
        }
    }
}

/// Abstraction over where the settings table is persisted.
#[async_trait]
pub trait SettingsBackend: Send + Sync {
    /// Loads the table, or `None` if it was never written.
    async fn load(&self) -> Result<Option<SettingsTable>>;

    /// Replaces the persisted table.
    async fn save(&self, table: &SettingsTable) -> Result<()>;
}

/// Stores the table as a JSON file, written atomically (write tmp + rename).
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    /// Creates a backend for the given file. Parent directories are created on save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsBackend for JsonFileBackend {
    async fn load(&self) -> Result<Option<SettingsTable>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, table: &SettingsTable) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, serde_json::to_vec_pretty(table)?).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

/// Keeps the table in memory. Useful for tests and ephemeral hosts.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    table: StdMutex<Option<SettingsTable>>,
}

impl MemoryBackend {
    /// Creates an empty backend, as if the store had never been opened.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend pre-populated with `table`.
    #[must_use]
    pub fn with_table(table: SettingsTable) -> Self {
        Self {
            table: StdMutex::new(Some(table)),
        }
    }
}

#[async_trait]
impl SettingsBackend for MemoryBackend {
    async fn load(&self) -> Result<Option<SettingsTable>> {
        self.table
            .lock()
            .map(|t| t.clone())
            .map_err(|_| Error::Storage("settings lock poisoned".to_string()))
    }

    async fn save(&self, table: &SettingsTable) -> Result<()> {
        *self
            .table
            .lock()
            .map_err(|_| Error::Storage("settings lock poisoned".to_string()))? = Some(table.clone());
        Ok(())
    }
}

/// The settings store.
pub struct Settings {
    backend: Box<dyn SettingsBackend>,
    version: u32,
    // Serializes read-modify-write cycles so concurrent `set`s don't lose updates.
    write_lock: Mutex<()>,
}

impl Settings {
    /// Opens the store and runs the schema upgrade before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read or written, or if it was
    /// written by a newer version.
    pub async fn open(backend: impl SettingsBackend + 'static, version: u32) -> Result<Self> {
        let settings = Self {
            backend: Box::new(backend),
            version,
            write_lock: Mutex::new(()),
        };
        settings.upgrade().await?;
        Ok(settings)
    }

    /// Opens an in-memory store.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the signature matches [`Settings::open`].
    pub async fn in_memory(version: u32) -> Result<Self> {
        Self::open(MemoryBackend::new(), version).await
    }

    /// Schema version this store upgrades to.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Brings the persisted table up to the current version.
    ///
    /// Missing default rows are seeded; existing values are never clobbered.
    /// Running it again on an up-to-date table is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if storage fails or the stored version is newer.
    pub async fn upgrade(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let stored = self.backend.load().await?;

        let mut table = match stored {
            Some(table) if table.version > self.version => {
                return Err(Error::VersionDowngrade {
                    stored: table.version,
                    supported: self.version,
                });
            }
            Some(table) if table.version == self.version => return Ok(()),
            Some(table) => table,
            None => SettingsTable::default(),
        };

        log::info!("Upgrading settings from version {} to {}", table.version, self.version);
        table.seed_defaults();
        table.version = self.version;
        self.backend.save(&table).await
    }

    async fn load(&self) -> Result<SettingsTable> {
        self.backend.load().await?.ok_or_else(|| {
            Error::Storage("settings table missing".to_string())
        })
    }

    /// Reads a single setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn get(&self, key: &str) -> Result<Option<Setting>> {
        Ok(self.load().await?.rows.remove(key))
    }

    /// Upserts a setting and stamps its update time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn set(&self, key: &str, value: impl Into<Value> + Send) -> Result<()> {
        let value = value.into();
        let _guard = self.write_lock.lock().await;
        let mut table = self.load().await?;
        table.rows.insert(
            key.to_string(),
            Setting {
                key: key.to_string(),
                value,
                updated_at: Some(Utc::now()),
            },
        );
        self.backend.save(&table).await
    }

    /// Whether offline mode is enabled.
    ///
    /// Fails safe: if the store is unavailable or the value is not a boolean,
    /// offline mode is reported as disabled.
    pub async fn is_offline_enabled(&self) -> bool {
        match self.get(ENABLE_OFFLINE).await {
            Ok(Some(setting)) => setting.value.as_bool().unwrap_or(false),
            Ok(None) => false,
            Err(e) => {
                log::warn!("Settings unavailable, treating offline mode as disabled: {e}");
                false
            }
        }
    }

    /// Persists the offline-mode flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn set_offline_enabled(&self, enabled: bool) -> Result<()> {
        self.set(ENABLE_OFFLINE, enabled).await
    }

    /// Time the offline manifest was last fetched from the network, if ever.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn last_check_updates(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .get(LAST_CHECK_UPDATES)
            .await?
            .and_then(|s| serde_json::from_value(s.value).ok()))
    }

    /// Records that the offline manifest was fetched now.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn touch_last_check_updates(&self) -> Result<()> {
        self.set(LAST_CHECK_UPDATES, serde_json::to_value(Utc::now())?)
            .await
    }

    /// Returns every row, for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn all(&self) -> Result<Vec<Setting>> {
        Ok(self.load().await?.rows.into_values().collect())
    }
}
