//! reqwest-backed [`Transport`].
//!
//! Adds two knobs on top of a plain client: a user agent and an optional minimum
//! delay between consecutive requests (the hook for rate limiting).

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::contract::{HttpResponse, Transport};
use crate::error::CrawlError;

pub const DEFAULT_USER_AGENT: &str = concat!("dircrawl/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub user_agent: String,
    /// Minimum spacing between request starts; zero disables the limiter.
    pub request_delay: Duration,
    pub timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_delay: Duration::ZERO,
            timeout: Some(Duration::from_secs(100)),
        }
    }
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    request_delay: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, CrawlError> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| CrawlError::Transport {
            url: String::new(),
            reason: format!("failed to build HTTP client: {e}"),
        })?;
        Ok(Self {
            client,
            request_delay: config.request_delay,
            next_slot: Mutex::new(None),
        })
    }

    async fn wait_for_slot(&self) {
        if self.request_delay.is_zero() {
            return;
        }
        let wait_until = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let start = match *next {
                Some(slot) if slot > now => slot,
                _ => now,
            };
            *next = Some(start + self.request_delay);
            start
        };
        tokio::time::sleep_until(wait_until).await;
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse, CrawlError> {
        self.wait_for_slot().await;

        let transport_err = |e: reqwest::Error| CrawlError::Transport {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = self.client.get(url).send().await.map_err(transport_err)?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(transport_err)?;
        debug!(url, status, bytes = body.len(), "Response received");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
