//! HTTP access for providers.
//!
//! Providers only see the [`HttpClient`] trait, so tests can swap in a
//! scripted client. [`ReqwestClient`] is the production implementation:
//! every request carries a timeout, and successful responses are cached
//! unless the caller opts out.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::TransportError;

/// Cache entries kept before the cache is flushed.
const CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    /// Parsed `Retry-After` header, if present.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, cache_enabled: bool) -> Result<HttpResponse, TransportError>;
}

pub struct ReqwestClient {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, HttpResponse>>,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Self::with_headers(timeout, reqwest::header::HeaderMap::new())
    }

    /// Build a client that sends `headers` on every request.
    pub fn with_headers(
        timeout: Duration,
        headers: reqwest::header::HeaderMap,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("impact/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, url: &str) -> Option<HttpResponse> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.get(url).cloned()
    }

    fn store(&self, url: &str, response: &HttpResponse) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.len() >= CACHE_CAPACITY {
            cache.clear();
        }
        cache.insert(url.to_string(), response.clone());
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, cache_enabled: bool) -> Result<HttpResponse, TransportError> {
        if cache_enabled {
            if let Some(hit) = self.cached(url) {
                debug!(%url, "http cache hit");
                return Ok(hit);
            }
        }

        let transport_err = |e: reqwest::Error| TransportError {
            url: url.to_string(),
            reason: e.to_string(),
            timed_out: e.is_timeout(),
        };

        let resp = self.client.get(url).send().await.map_err(transport_err)?;
        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = resp.text().await.map_err(transport_err)?;

        let response = HttpResponse {
            status,
            body,
            retry_after,
        };
        debug!(%url, status, "http get");

        if cache_enabled && response.is_success() {
            self.store(url, &response);
        }
        Ok(response)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted client for provider tests.

    use super::*;

    /// Answers by URL substring; unmatched URLs get a 404.
    #[derive(Default)]
    pub struct ScriptedHttp {
        routes: Vec<(String, HttpResponse)>,
        /// Every requested URL with its `cache_enabled` flag.
        pub requests: Mutex<Vec<(String, bool)>>,
    }

    impl ScriptedHttp {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(mut self, url_part: &str, status: u16, body: &str) -> Self {
            self.routes.push((
                url_part.to_string(),
                HttpResponse {
                    status,
                    body: body.to_string(),
                    retry_after: None,
                },
            ));
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        /// URLs requested with caching allowed.
        pub fn cached_requests(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, cached)| *cached)
                .map(|(url, _)| url.clone())
                .collect()
        }
    }

    #[async_trait]
    impl HttpClient for ScriptedHttp {
        async fn get(&self, url: &str, cache_enabled: bool) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push((url.to_string(), cache_enabled));
            let hit = self
                .routes
                .iter()
                .find(|(part, _)| url.contains(part.as_str()))
                .map(|(_, resp)| resp.clone());
            Ok(hit.unwrap_or(HttpResponse {
                status: 404,
                body: String::new(),
                retry_after: None,
            }))
        }
    }
}
