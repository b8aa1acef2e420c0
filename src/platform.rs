//! Hooks into the host that runs the worker (windows, lifecycle, job UI).

use async_trait::async_trait;
use url::Url;

use crate::error::Result;

/// Host capabilities the worker drives but does not own.
///
/// All methods have default no-op implementations for convenience.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Activates this worker without waiting for older instances to finish.
    async fn skip_waiting(&self) -> Result<()> {
        Ok(())
    }

    /// Takes control of every open view immediately.
    async fn claim_clients(&self) -> Result<()> {
        Ok(())
    }

    /// Reloads every open window of the site. Returns how many were reloaded.
    async fn reload_windows(&self) -> Result<usize> {
        Ok(0)
    }

    /// Opens a new window at `url`.
    async fn open_window(&self, _url: &Url) -> Result<()> {
        Ok(())
    }

    /// Updates the UI affordance of a background download job.
    async fn update_background_fetch_ui(&self, _id: &str, _title: &str) -> Result<()> {
        Ok(())
    }
}

/// A platform with no windows, used by the command-line host. It logs every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessPlatform;

#[async_trait]
impl Platform for HeadlessPlatform {
    async fn skip_waiting(&self) -> Result<()> {
        log::debug!("skip_waiting");
        Ok(())
    }

    async fn claim_clients(&self) -> Result<()> {
        log::debug!("claim_clients");
        Ok(())
    }

    async fn reload_windows(&self) -> Result<usize> {
        log::info!("No windows to reload");
        Ok(0)
    }

    async fn open_window(&self, url: &Url) -> Result<()> {
        log::info!("Open {url}");
        Ok(())
    }

    async fn update_background_fetch_ui(&self, id: &str, title: &str) -> Result<()> {
        log::info!("[{id}] {title}");
        Ok(())
    }
}
