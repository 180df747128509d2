//! # providers: per-provider listing strategies
//!
//! Each provider implements [`Populate`] and is selected through the
//! [`ProviderTag`] stored on the node being crawled:
//! - [`calibre::CalibreProvider`]: e-book library server, single-page listings
//!   with per-book fan-out
//! - [`gofile::GoFileProvider`]: file locker with an anonymous account token
//! - [`mediafire::MediafireProvider`]: cloud drive with typed, chunked passes
//!
//! Providers never panic on provider data: every failure becomes a
//! [`CrawlError`] and is recorded in the [`CrawlSession`] before it propagates.

pub mod calibre;
pub mod gofile;
pub mod mediafire;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::contract::{Populate, Transport};
use crate::error::CrawlError;
use crate::session::CrawlSession;
use crate::tree::DirectoryNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTag {
    Calibre,
    GoFile,
    Mediafire,
}

impl ProviderTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTag::Calibre => "calibre",
            ProviderTag::GoFile => "gofile",
            ProviderTag::Mediafire => "mediafire",
        }
    }

    /// Recognizes providers that live on a fixed host. Library servers are
    /// self-hosted and must be configured explicitly.
    pub fn detect(url: &str) -> Option<Self> {
        let host = reqwest::Url::parse(url).ok()?.host_str()?.to_ascii_lowercase();
        let on = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));
        if on("gofile.io") {
            Some(ProviderTag::GoFile)
        } else if on("mediafire.com") {
            Some(ProviderTag::Mediafire)
        } else {
            None
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "calibre" => Ok(ProviderTag::Calibre),
            "gofile" | "gofileio" | "gofile.io" => Ok(ProviderTag::GoFile),
            "mediafire" => Ok(ProviderTag::Mediafire),
            other => Err(format!("unknown provider '{other}'")),
        }
    }
}

/// Options shared by the built-in providers.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub max_concurrent_enrichments: usize,
    /// Library-server version string used instead of the `Server` header.
    pub calibre_version: Option<String>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            max_concurrent_enrichments: calibre::DEFAULT_MAX_CONCURRENT_ENRICHMENTS,
            calibre_version: None,
        }
    }
}

/// Maps provider tags to their [`Populate`] implementation.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderTag, Arc<dyn Populate>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in provider sharing one transport.
    pub fn with_defaults(transport: Arc<dyn Transport>, options: ProviderOptions) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(
            calibre::CalibreProvider::new(transport.clone())
                .with_max_concurrency(options.max_concurrent_enrichments)
                .with_version(options.calibre_version),
        ));
        registry.register(Arc::new(gofile::GoFileProvider::new(transport.clone())));
        registry.register(Arc::new(mediafire::MediafireProvider::new(transport)));
        registry
    }

    /// Replaces any provider registered under the same tag.
    pub fn register(&mut self, provider: Arc<dyn Populate>) {
        self.providers.insert(provider.tag(), provider);
    }

    pub fn get(&self, tag: ProviderTag) -> Option<Arc<dyn Populate>> {
        self.providers.get(&tag).cloned()
    }

    /// Picks the provider for `node`: its own tag first, then detection from the URL.
    pub fn resolve(&self, node: &DirectoryNode) -> Result<Arc<dyn Populate>, CrawlError> {
        let tag = node
            .provider()
            .or_else(|| ProviderTag::detect(node.url()))
            .ok_or_else(|| CrawlError::UnknownProvider {
                url: node.url().to_string(),
            })?;
        node.tag_provider(tag);
        self.get(tag).ok_or_else(|| CrawlError::UnknownProvider {
            url: node.url().to_string(),
        })
    }
}

/// Records a node-scope failure before handing it back to the caller.
pub(crate) fn contain<T>(
    session: &CrawlSession,
    node: &DirectoryNode,
    result: Result<T, CrawlError>,
) -> Result<T, CrawlError> {
    if let Err(e) = &result {
        session.record_node_failure(node, e);
    }
    result
}

pub(crate) fn decode_json<T: DeserializeOwned>(url: &str, body: &str) -> Result<T, CrawlError> {
    serde_json::from_str(body).map_err(|e| {
        debug!(url, error = %e, "Undecodable provider response");
        CrawlError::decode(url, e)
    })
}

/// Sizes arrive as numbers from some APIs and as numeric strings from others.
pub(crate) fn lenient_size<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Size {
        Number(u64),
        Float(f64),
        Text(String),
        Missing(Option<()>),
    }

    Ok(match Size::deserialize(deserializer)? {
        Size::Number(n) => n,
        Size::Float(f) if f > 0.0 => f as u64,
        Size::Text(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

/// Replaces characters that cannot appear in a file name on common filesystems.
pub(crate) fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
