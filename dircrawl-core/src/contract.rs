//! # contract: the seams of the crawler
//!
//! This module defines the traits the crawler is assembled from, and the plain
//! data passed across them:
//! - [`Transport`]: issues one HTTP GET and hands back status, headers and body
//! - [`Populate`]: the per-provider capability that fills one [`DirectoryNode`]
//! - [`InventorySink`]: receives discovered file URLs for persistence
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall` so tests (and downstream crates via the
//!   `test-export-mocks` feature) get deterministic mocks.
//!
//! ## Adding a provider
//! - Implement [`Populate`] for it and register it in
//!   [`crate::providers::ProviderRegistry`].
//! - Convert every upstream failure into a [`CrawlError`] variant; never panic.

use std::sync::Arc;

use async_trait::async_trait;
#[allow(unused_imports)]
use mockall::{automock, predicate::*};

use crate::error::{CrawlError, InventoryError};
use crate::inventory::InventoryRecord;
use crate::providers::ProviderTag;
use crate::session::CrawlSession;
use crate::tree::DirectoryNode;

/// The parts of an HTTP response the providers look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are stored lowercased.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    /// A 200 response with the given body and no headers.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Fails with [`CrawlError::HttpStatus`] unless the status is 2xx.
    pub fn error_for_status(self, url: &str) -> Result<Self, CrawlError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(CrawlError::HttpStatus {
                url: url.to_string(),
                status: self.status,
            })
        }
    }
}

/// Issues HTTP GET requests on behalf of the providers.
///
/// Implementations own retry, proxy and rate-limit policy. A non-2xx status is
/// *not* an error at this level; providers decide what a status means.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, CrawlError>;
}

/// How a populate call ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopulateOutcome {
    /// The listing was retrieved; `failed_passes` counts passes that were
    /// aborted after the node's first call succeeded.
    Populated { failed_passes: usize },
    /// The branch was skipped on purpose (e.g. unsupported provider version).
    /// The node stays empty and nothing is recorded as an error.
    Skipped { reason: String },
}

/// Per-provider capability: fill one node with its children and files.
///
/// On `Err` the implementation has already marked the node failed and recorded
/// the failure in the session; the caller only decides whether to carry on
/// with sibling subtrees.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Populate: Send + Sync {
    fn tag(&self) -> ProviderTag;

    async fn populate(
        &self,
        node: &Arc<DirectoryNode>,
        session: &CrawlSession,
    ) -> Result<PopulateOutcome, CrawlError>;
}

/// Receives discovered files for persistence.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait InventorySink: Send + Sync {
    /// Inserts every record whose URL is not stored yet; returns how many were inserted.
    async fn upsert(&self, records: &[InventoryRecord]) -> Result<usize, InventoryError>;
}
