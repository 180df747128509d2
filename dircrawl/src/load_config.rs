/// `load_config` module: reads the static YAML crawl configuration and injects
/// secrets from the environment.
///
/// # Responsibilities
/// - Parse the user-supplied YAML into [`CliConfig`], filling documented defaults
/// - Validate what the core crate cannot: the provider name and the root URL
/// - Pick up `GOFILE_ACCOUNT_TOKEN` so an existing file-locker account is reused
///
/// # Errors
/// Every failure is an `anyhow::Error` with the config path in its message and
/// surfaces at the CLI boundary.
use anyhow::{Context, Result};
use dircrawl_core::providers::calibre::DEFAULT_MAX_CONCURRENT_ENRICHMENTS;
use dircrawl_core::providers::ProviderTag;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

/// Environment variable holding a pre-existing file-locker account token.
pub const GOFILE_TOKEN_ENV: &str = "GOFILE_ACCOUNT_TOKEN";

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub crawl: CrawlSection,
    pub output: OutputSection,
    pub gofile_account_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlSection {
    pub url: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_max_concurrent_nodes")]
    pub max_concurrent_nodes: usize,
    #[serde(default = "default_max_concurrent_enrichments")]
    pub max_concurrent_enrichments: usize,
    #[serde(default)]
    pub request_delay_ms: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub calibre_version: Option<String>,
}

impl CrawlSection {
    /// The configured provider, parsed.
    pub fn provider_tag(&self) -> Result<Option<ProviderTag>> {
        self.provider
            .as_deref()
            .map(|p| p.parse::<ProviderTag>().map_err(anyhow::Error::msg))
            .transpose()
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputSection {
    /// Pretty JSON snapshot of the crawled tree.
    #[serde(default)]
    pub tree_json: Option<PathBuf>,
    /// JSON lines inventory of discovered file URLs.
    #[serde(default)]
    pub inventory: Option<PathBuf>,
}

fn default_max_concurrent_nodes() -> usize {
    dircrawl_core::crawl::DEFAULT_MAX_CONCURRENT_NODES
}

fn default_max_concurrent_enrichments() -> usize {
    DEFAULT_MAX_CONCURRENT_ENRICHMENTS
}

/// Loads a YAML config file and injects secrets from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    #[derive(Debug, Deserialize)]
    struct RawConfig {
        crawl: CrawlSection,
        #[serde(default)]
        output: OutputSection,
    }

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if raw.crawl.url.trim().is_empty() {
        anyhow::bail!("crawl.url must not be empty in {:?}", path_ref);
    }
    raw.crawl
        .provider_tag()
        .with_context(|| format!("Invalid crawl.provider in {:?}", path_ref))?;

    let gofile_account_token = std::env::var(GOFILE_TOKEN_ENV)
        .ok()
        .filter(|t| !t.trim().is_empty());

    Ok(CliConfig {
        crawl: raw.crawl,
        output: raw.output,
        gofile_account_token,
    })
}
