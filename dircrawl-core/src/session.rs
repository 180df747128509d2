//! # session: crawl-scoped shared state
//!
//! A [`CrawlSession`] lives from crawl start to crawl end and is handed to every
//! populate call. It holds:
//! - the credential cache (provider key → ephemeral token), with single-flight
//!   acquisition so concurrent first use triggers at most one bootstrap call
//! - the error accumulator (monotonic count plus a deduplicated URL list)
//! - the cancellation token observed at every network call
//!
//! Nothing here is global; the driver creates one session per crawl run.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::contract::{HttpResponse, Transport};
use crate::error::CrawlError;
use crate::tree::DirectoryNode;

type CredentialCell = Arc<OnceCell<Result<String, CrawlError>>>;

#[derive(Debug, Default)]
struct ErrorUrls {
    ordered: Vec<String>,
    seen: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct CrawlSession {
    credentials: Mutex<HashMap<String, CredentialCell>>,
    error_count: AtomicU64,
    error_urls: Mutex<ErrorUrls>,
    cancel: CancellationToken,
}

impl CrawlSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session that aborts when `token` (or any parent token) is cancelled.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            ..Self::default()
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn credential_cell(&self, key: &str) -> CredentialCell {
        self.credentials
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// The credential stored under `key`, if one was acquired or seeded.
    pub fn credential(&self, key: &str) -> Option<String> {
        self.credentials
            .lock()
            .get(key)
            .and_then(|cell| cell.get())
            .and_then(|outcome| outcome.as_ref().ok().cloned())
    }

    /// Stores a credential obtained out of band (e.g. from configuration).
    /// Returns `false` and leaves the cache untouched if the key is already set
    /// or its acquisition has started.
    pub fn seed_credential(&self, key: &str, value: impl Into<String>) -> bool {
        let mut credentials = self.credentials.lock();
        if credentials.contains_key(key) {
            return false;
        }
        credentials.insert(
            key.to_string(),
            Arc::new(OnceCell::new_with(Some(Ok(value.into())))),
        );
        true
    }

    /// Returns the credential under `key`, running `acquire` if none is cached.
    ///
    /// Concurrent callers for the same key wait on a single acquisition. The
    /// outcome is kept for the rest of the crawl, failures included, so a key
    /// is bootstrapped at most once per session.
    pub async fn credential_or_acquire<F, Fut>(
        &self,
        key: &str,
        acquire: F,
    ) -> Result<String, CrawlError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, CrawlError>>,
    {
        let cell = self.credential_cell(key);
        let outcome = cell
            .get_or_init(move || async move {
                debug!(key, "Acquiring credential");
                acquire().await
            })
            .await;
        outcome.clone()
    }

    /// Counts one failure and remembers its URL (each URL is listed once).
    pub fn record_error(&self, url: &str) {
        self.error_count.fetch_add(1, Ordering::SeqCst);
        let mut urls = self.error_urls.lock();
        if urls.seen.insert(url.to_string()) {
            urls.ordered.push(url.to_string());
        }
    }

    /// Applies the containment policy to a node-scope failure: flag the node and
    /// record it once. Cancellation is not a failure and leaves the node untouched.
    pub fn record_node_failure(&self, node: &DirectoryNode, err: &CrawlError) {
        if matches!(err, CrawlError::Cancelled) {
            debug!(url = node.url(), "Population interrupted by cancellation");
            return;
        }
        error!(url = node.url(), error = %err, "Error populating directory");
        if node.mark_failed() {
            self.record_error(node.url());
        }
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::SeqCst)
    }

    /// Failing URLs in the order they were first recorded.
    pub fn error_urls(&self) -> Vec<String> {
        self.error_urls.lock().ordered.clone()
    }

    /// Issues a GET through `transport`, aborting promptly on cancellation.
    pub async fn fetch(
        &self,
        transport: &dyn Transport,
        url: &str,
    ) -> Result<HttpResponse, CrawlError> {
        if self.cancel.is_cancelled() {
            return Err(CrawlError::Cancelled);
        }
        debug!(url, "GET");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CrawlError::Cancelled),
            response = transport.get(url) => response,
        }
    }
}
