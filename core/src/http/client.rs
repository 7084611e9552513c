use async_trait::async_trait;
use rand::prelude::IndexedRandom;
use reqwest::{Client, ClientBuilder, Proxy};
use std::time::Duration;

use super::{PageRequest, PageResponse, Transport};
use crate::errors::SurfaceError;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) \
     Gecko/20100101 Firefox/120.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_0) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

/// Cookie-keeping HTTP transport. One instance backs one identity at a time;
/// `reset` swaps in a fresh cookie jar.
pub struct HttpClient {
    inner: Client,
    user_agent: &'static str,
    timeout: Duration,
    proxy: Option<String>,
}

impl HttpClient {
    pub fn new(timeout_seconds: u64, proxy_url: Option<&str>) -> Result<Self, SurfaceError> {
        let timeout = Duration::from_secs(timeout_seconds);
        let proxy = proxy_url.map(str::to_string);
        let inner = build_client(timeout, proxy.as_deref())?;

        // The agent is fixed for the client's lifetime; sessions are often
        // bound to it.
        let mut rng = rand::rng();
        let user_agent = *USER_AGENTS.choose(&mut rng).unwrap_or(&"Mozilla/5.0");

        Ok(Self {
            inner,
            user_agent,
            timeout,
            proxy,
        })
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent
    }
}

fn build_client(timeout: Duration, proxy: Option<&str>) -> Result<Client, SurfaceError> {
    let mut builder = ClientBuilder::new()
        .timeout(timeout)
        .cookie_store(true)
        .danger_accept_invalid_certs(true);

    if let Some(proxy) = proxy {
        if let Ok(p) = Proxy::all(proxy) {
            builder = builder.proxy(p);
        }
    }

    builder.build().map_err(|e| SurfaceError::Navigation {
        url: String::new(),
        reason: format!("failed to build http client: {}", e),
    })
}

#[async_trait]
impl Transport for HttpClient {
    async fn fetch(&mut self, request: &PageRequest) -> Result<PageResponse, SurfaceError> {
        let mut builder = self
            .inner
            .request(request.method.clone(), request.url.as_str())
            .header(reqwest::header::USER_AGENT, self.user_agent)
            .timeout(self.timeout);

        if let Some(ref fields) = request.form {
            builder = builder.form(fields);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                SurfaceError::Timeout(self.timeout)
            } else {
                SurfaceError::Navigation {
                    url: request.url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let url = response.url().clone();
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| SurfaceError::Navigation {
            url: url.to_string(),
            reason: format!("failed to read body: {}", e),
        })?;

        Ok(PageResponse { url, status, body })
    }

    fn reset(&mut self) -> Result<(), SurfaceError> {
        self.inner = build_client(self.timeout, self.proxy.as_deref())?;
        Ok(())
    }
}
