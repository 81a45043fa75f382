//! HTTP(S) PUT/POST pusher over an injected client.

use super::retry::{with_retry, CircuitBreaker};
use super::{PushError, Pusher, PusherStats, RetryPolicy};
use async_trait::async_trait;
use log::debug;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Put,
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Put => "PUT",
            HttpMethod::Post => "POST",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

/// Injected upload transport; implementations surface arbitrary transport
/// errors as `anyhow` and let the pusher classify them.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn upload(
        &self,
        url: &str,
        method: HttpMethod,
        headers: &[(String, String)],
        body: &[u8],
    ) -> anyhow::Result<HttpResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpPusherConfig {
    /// Directory-style base; object names are joined onto it (S3-style
    /// `https://bucket.host/prefix/`).
    pub base_url: Url,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub retry: RetryPolicy,
}

impl HttpPusherConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            method: HttpMethod::Put,
            headers: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Uploads segments and playlists to one HTTP endpoint.
pub struct HttpPusher<C> {
    config: HttpPusherConfig,
    client: C,
    breaker: CircuitBreaker,
    stats: PusherStats,
}

impl<C: HttpClient> HttpPusher<C> {
    pub fn new(config: HttpPusherConfig, client: C) -> Self {
        let breaker = CircuitBreaker::new(
            config.retry.circuit_breaker_threshold,
            config.retry.max_delay,
        );
        Self {
            config,
            client,
            breaker,
            stats: PusherStats::default(),
        }
    }

    fn url_for(&self, name: &str) -> Result<String, PushError> {
        self.config
            .base_url
            .join(name)
            .map(|u| u.to_string())
            .map_err(|e| PushError::Permanent {
                reason: format!("invalid object name {name:?}: {e}"),
                status: None,
            })
    }

    async fn upload(
        &mut self,
        body: &[u8],
        name: &str,
        content_type: &str,
    ) -> Result<(), PushError> {
        let url = self.url_for(name)?;
        let mut headers = self.config.headers.clone();
        headers.push(("Content-Type".to_string(), content_type.to_string()));

        let client = &self.client;
        let method = self.config.method;
        let (result, attempts) = with_retry(&self.config.retry, &mut self.breaker, name, || {
            let url = url.clone();
            let headers = headers.clone();
            async move {
                let response = client
                    .upload(&url, method, &headers, body)
                    .await
                    .map_err(|e| PushError::Transient {
                        reason: e.to_string(),
                        status: None,
                    })?;
                match PushError::from_status(response.status) {
                    None => Ok(()),
                    Some(err) => Err(err),
                }
            }
        })
        .await;

        self.stats.retries += u64::from(attempts);
        self.stats.last_attempts = attempts;
        match &result {
            Ok(()) => {
                self.stats.bytes_sent += body.len() as u64;
                debug!("uploaded {name} ({} bytes, {attempts} retries)", body.len());
            }
            Err(e) => {
                self.stats.failures += 1;
                self.stats.last_error = Some(e.to_string());
            }
        }
        result
    }
}

#[async_trait]
impl<C: HttpClient> Pusher for HttpPusher<C> {
    async fn connect(&mut self) -> Result<(), PushError> {
        // HTTP is connectionless; nothing to establish
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), PushError> {
        Ok(())
    }

    async fn push_segment(&mut self, data: &[u8], name: &str) -> Result<(), PushError> {
        let content_type = if name.ends_with(".ts") {
            "video/mp2t"
        } else {
            "video/mp4"
        };
        let result = self.upload(data, name, content_type).await;
        if result.is_ok() {
            self.stats.segments_pushed += 1;
        }
        result
    }

    async fn push_playlist(&mut self, text: &str, name: &str) -> Result<(), PushError> {
        let result = self
            .upload(text.as_bytes(), name, "application/vnd.apple.mpegurl")
            .await;
        if result.is_ok() {
            self.stats.playlists_pushed += 1;
        }
        result
    }

    async fn push_partial(&mut self, data: &[u8], name: &str) -> Result<(), PushError> {
        let result = self.upload(data, name, "video/mp4").await;
        if result.is_ok() {
            self.stats.partials_pushed += 1;
        }
        result
    }

    fn stats(&self) -> PusherStats {
        self.stats.clone()
    }
}

/// Default client backed by `reqwest`.
#[cfg(feature = "http-push")]
pub struct ReqwestClient {
    inner: reqwest::Client,
}

#[cfg(feature = "http-push")]
impl ReqwestClient {
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }
}

#[cfg(feature = "http-push")]
impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http-push")]
#[async_trait]
impl HttpClient for ReqwestClient {
    async fn upload(
        &self,
        url: &str,
        method: HttpMethod,
        headers: &[(String, String)],
        body: &[u8],
    ) -> anyhow::Result<HttpResponse> {
        let mut req = match method {
            HttpMethod::Put => self.inner.put(url),
            HttpMethod::Post => self.inner.post(url),
        };
        for (k, v) in headers {
            req = req.header(k, v);
        }
        let response = req.body(body.to_vec()).send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
            .collect();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
