//! offline-sw - the offline-caching engine of a website's service worker.
//!
//! The engine classifies every outgoing request into a cache strategy, keeps
//! an opt-in offline bundle of pages in sync with a remote manifest, and
//! commits the results of platform background downloads. Storage, network
//! and host capabilities sit behind ports so the same engine runs against the
//! real network and disk or against in-memory fakes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use offline_sw::{AppConfig, Command, OfflineWorker, Request};
//! use offline_sw::platform::HeadlessPlatform;
//!
//! # async fn example() -> offline_sw::Result<()> {
//! let app = AppConfig::load(&AppConfig::default_path())?;
//! let worker = OfflineWorker::open(&app, Arc::new(HeadlessPlatform)).await?;
//!
//! worker.install().await?;
//! worker.activate().await?;
//!
//! // Opt into offline mode and download the bundle
//! if let Some(report) = worker.handle_command(Command::EnableOffline).await? {
//!     println!("Downloaded {} files", report.counts.downloaded);
//! }
//!
//! // Serve a request through the router
//! let _response = worker.fetch(&Request::parse("http://localhost:3000/")?).await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod background;
pub mod broadcast;
pub mod cache;
pub mod config;
pub mod error;
pub mod format;
pub mod http;
pub mod manifest;
pub mod platform;
pub mod reconcile;
pub mod router;
pub mod settings;
pub mod status;
pub mod worker;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use cache::{CacheStore, FsCacheStore, MemoryCacheStore};
pub use config::{AppConfig, PathConfig, WorkerConfig};
pub use error::{Error, Result};
pub use http::{CacheMode, Fetcher, ReqwestFetcher, Request, Response};
pub use reconcile::{ReconcileReport, ReconciliationPlan, Reconciler};
pub use router::{CacheRouter, Deferred, RouteOutcome, Strategy};
pub use settings::Settings;
pub use status::{DownloadStatus, StatusCounts};
pub use worker::{Command, OfflineWorker};
