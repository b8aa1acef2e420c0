//! Test doubles shared across module tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use url::Url;

use crate::background::{BackgroundFetchRecord, BackgroundFetchRegistration};
use crate::error::{Error, Result};
use crate::http::{CacheMode, Fetcher, Request, Response};
use crate::platform::Platform;

#[derive(Clone)]
enum Route {
    Respond(u16, String),
    Fail,
    Hang,
    Gated(u16, String, Arc<Semaphore>),
}

/// A programmable network.
///
/// Unknown URLs fail like an unreachable host. `hang` makes a URL never
/// answer, which is how tests hold a download in flight. `gate` holds the
/// answer until the test adds a permit to the returned semaphore.
#[derive(Default)]
pub struct MockFetcher {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<Request>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(&self, url: &str, route: Route) {
        self.routes.lock().unwrap().insert(url.to_string(), route);
    }

    pub fn respond(&self, url: &str, status: u16, body: impl Into<String>) {
        self.route(url, Route::Respond(status, body.into()));
    }

    pub fn fail(&self, url: &str) {
        self.route(url, Route::Fail);
    }

    pub fn hang(&self, url: &str) {
        self.route(url, Route::Hang);
    }

    pub fn gate(&self, url: &str, status: u16, body: impl Into<String>) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.route(url, Route::Gated(status, body.into(), Arc::clone(&gate)));
        gate
    }

    /// Number of requests made for `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.as_str() == url)
            .count()
    }

    /// Cache mode of the most recent request for `url`.
    pub fn last_cache_mode(&self, url: &str) -> Option<CacheMode> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.url.as_str() == url)
            .map(|r| r.cache)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        self.calls.lock().unwrap().push(request.clone());
        let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
        match route {
            Some(Route::Respond(status, body)) => Ok(Response::new(request.url.as_str(), status, body)),
            Some(Route::Hang) => futures::future::pending().await,
            Some(Route::Gated(status, body, gate)) => {
                let _permit = gate
                    .acquire()
                    .await
                    .map_err(|e| Error::Network(e.to_string()))?;
                Ok(Response::new(request.url.as_str(), status, body))
            }
            Some(Route::Fail) | None => Err(Error::Network(format!("unreachable: {}", request.url))),
        }
    }
}

/// Renders a manifest body from `(page, files)` pairs.
pub fn manifest_json(pages: Vec<(&str, Vec<&str>)>) -> String {
    let pages: Vec<_> = pages
        .into_iter()
        .map(|(url, files)| serde_json::json!({ "url": url, "files": files }))
        .collect();
    serde_json::json!({ "pages": pages }).to_string()
}

/// A platform that records what the worker asked of it.
#[derive(Default)]
pub struct RecordingPlatform {
    pub events: Mutex<Vec<String>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Platform for RecordingPlatform {
    async fn skip_waiting(&self) -> Result<()> {
        self.record("skip-waiting".to_string());
        Ok(())
    }

    async fn claim_clients(&self) -> Result<()> {
        self.record("claim".to_string());
        Ok(())
    }

    async fn reload_windows(&self) -> Result<usize> {
        self.record("reload".to_string());
        Ok(1)
    }

    async fn open_window(&self, url: &Url) -> Result<()> {
        self.record(format!("open {url}"));
        Ok(())
    }

    async fn update_background_fetch_ui(&self, id: &str, title: &str) -> Result<()> {
        self.record(format!("ui {id}: {title}"));
        Ok(())
    }
}

/// A finished background download job.
pub struct MockRegistration {
    pub id: String,
    pub records: Vec<(String, &'static str)>,
}

#[async_trait]
impl BackgroundFetchRegistration for MockRegistration {
    fn id(&self) -> &str {
        &self.id
    }

    async fn match_all(&self) -> Result<Vec<BackgroundFetchRecord>> {
        self.records
            .iter()
            .map(|(url, body)| {
                Ok(BackgroundFetchRecord {
                    request: Request::parse(url)?,
                    response: Response::new(url.as_str(), 200, *body),
                })
            })
            .collect()
    }
}
