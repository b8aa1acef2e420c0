//! Request/response types and the network port.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, Result};

/// How a request interacts with intermediate HTTP caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Let the HTTP stack decide.
    #[default]
    Default,
    /// Revalidate with the server before using any cached copy.
    NoCache,
    /// Neither read nor write any HTTP cache.
    NoStore,
}

/// An outgoing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Absolute request URL.
    pub url: Url,
    /// HTTP cache behaviour.
    pub cache: CacheMode,
}

impl Request {
    /// Creates a GET request with default cache behaviour.
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self {
            url,
            cache: CacheMode::Default,
        }
    }

    /// Sets the HTTP cache behaviour.
    #[must_use]
    pub const fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    /// Parses `url` into a default request.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not an absolute URL.
    pub fn parse(url: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(url)?))
    }
}

/// A fully buffered response.
///
/// Bodies are reference counted, so cloning a response to hand one copy to
/// the caller and another to a cache is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Final URL of the response.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
}

impl Response {
    /// Creates a response with the given status and body and no headers.
    #[must_use]
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Returns the first header with the given name, case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Turns a non-2xx response into an [`Error::Status`].
    ///
    /// # Errors
    ///
    /// Returns an error if the status is not in the 2xx range.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_ok() {
            Ok(self)
        } else {
            Err(Error::Status {
                url: self.url,
                status: self.status,
            })
        }
    }
}

/// Abstraction over the network for testability.
///
/// Implementations return `Err` only when no response could be obtained at
/// all. A non-2xx answer is still `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Performs the request and buffers the whole response.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// Default fetcher backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Creates a fetcher with a tuned connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(std::time::Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        let mut builder = self.client.get(request.url.clone());
        match request.cache {
            CacheMode::Default => {}
            CacheMode::NoCache => {
                builder = builder.header(reqwest::header::CACHE_CONTROL, "no-cache");
            }
            CacheMode::NoStore => {
                builder = builder
                    .header(reqwest::header::CACHE_CONTROL, "no-store")
                    .header(reqwest::header::PRAGMA, "no-cache");
            }
        }

        let response = builder.send().await?;
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.bytes().await?;

        Ok(Response {
            url,
            status,
            headers,
            body,
        })
    }
}
