//! Resource id extraction from provider URLs.
//!
//! Deployments of the same provider expose folders under different URL shapes,
//! so each provider carries an ordered list of patterns. The first pattern that
//! matches wins; patterns are never merged into one.

use regex::Regex;

use crate::error::CrawlError;

/// Name of the capture group holding the id in every pattern.
const ID_GROUP: &str = "id";

#[derive(Debug, Clone)]
pub struct IdExtractor {
    provider: &'static str,
    patterns: Vec<Regex>,
}

impl IdExtractor {
    /// Compiles `patterns` in priority order. Each must contain a `(?P<id>...)` group.
    pub fn new(provider: &'static str, patterns: &[&str]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { provider, patterns })
    }

    pub fn extract(&self, url: &str) -> Result<String, CrawlError> {
        self.patterns
            .iter()
            .find_map(|re| re.captures(url))
            .and_then(|caps| caps.name(ID_GROUP))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| CrawlError::AddressUnparseable {
                provider: self.provider.to_string(),
                url: url.to_string(),
            })
    }
}
