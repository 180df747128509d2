//! Error types for dircrawl-core
//!
//! Every fallible crawl operation returns [`CrawlError`]. The variants follow the
//! containment policy of the crawler:
//! - node-scope failures (unparseable address, credential bootstrap, transport)
//!   mark the node failed and propagate to the caller
//! - item-scope failures ([`CrawlError::ItemEnrichment`]) are recorded and swallowed
//! - an unsupported provider version is not an error at all; see
//!   [`crate::contract::PopulateOutcome::Skipped`]

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrawlError {
    /// None of the provider's address patterns matched the node URL.
    #[error("Unable to extract a {provider} resource id from '{url}'")]
    AddressUnparseable { provider: String, url: String },

    /// The bootstrap call for an ephemeral credential did not succeed.
    #[error("Credential acquisition failed for '{key}': {reason}")]
    CredentialAcquisitionFailed { key: String, reason: String },

    /// The request could not be sent or its body could not be read.
    #[error("Request to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// Non-success HTTP status.
    #[error("Request to '{url}' returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// The provider answered, but reported a non-success status in its payload.
    #[error("Provider reported status '{status}' for '{url}'")]
    ProviderStatus { url: String, status: String },

    /// The body was not the JSON document the provider contract describes.
    #[error("Failed to decode response from '{url}': {reason}")]
    Decode { url: String, reason: String },

    /// A version string that does not contain a numeric major version.
    #[error("Invalid version string '{0}'")]
    InvalidVersion(String),

    /// Building one item of a fan-out failed; scoped to that item.
    #[error("Failed to enrich item '{item}': {reason}")]
    ItemEnrichment { item: String, reason: String },

    /// The node carries no provider tag and none could be detected from its URL.
    #[error("No provider registered for '{url}'")]
    UnknownProvider { url: String },

    /// The crawl session was cancelled while the operation was in flight.
    #[error("Crawl cancelled")]
    Cancelled,
}

impl CrawlError {
    /// True for every variant that stems from a listing/bootstrap call.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            CrawlError::Transport { .. }
                | CrawlError::HttpStatus { .. }
                | CrawlError::ProviderStatus { .. }
                | CrawlError::Decode { .. }
        )
    }

    pub(crate) fn decode(url: &str, err: impl std::fmt::Display) -> Self {
        CrawlError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Failures of the inventory sink.
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Inventory I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Inventory record could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}
