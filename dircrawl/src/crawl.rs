//! Wiring of one crawl run: config → transport → providers → crawler → outputs.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use dircrawl_core::contract::InventorySink;
use dircrawl_core::crawl::{CrawlReport, Crawler};
use dircrawl_core::inventory::{InventoryRecord, JsonLinesInventory};
use dircrawl_core::providers::gofile::ACCOUNT_TOKEN_KEY;
use dircrawl_core::providers::{ProviderOptions, ProviderRegistry};
use dircrawl_core::session::CrawlSession;
use dircrawl_core::transport::{ReqwestTransport, TransportConfig, DEFAULT_USER_AGENT};
use dircrawl_core::tree::{DirectoryNode, TreeSnapshot};
use reqwest::Url;
use tracing::info;

use crate::load_config::CliConfig;

/// Crawls the configured root and writes the configured outputs.
///
/// Crawl failures end up in the report; only setup and output errors are returned.
pub async fn execute(config: &CliConfig, session: &CrawlSession) -> Result<CrawlReport> {
    let crawl = &config.crawl;
    let transport = ReqwestTransport::new(&TransportConfig {
        user_agent: crawl
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        request_delay: crawl.request_delay(),
        ..TransportConfig::default()
    })
    .context("Failed to build HTTP transport")?;

    let registry = ProviderRegistry::with_defaults(
        Arc::new(transport),
        ProviderOptions {
            max_concurrent_enrichments: crawl.max_concurrent_enrichments,
            calibre_version: crawl.calibre_version.clone(),
        },
    );
    let crawler = Crawler::new(registry).with_max_concurrent_nodes(crawl.max_concurrent_nodes);

    if let Some(token) = &config.gofile_account_token {
        session.seed_credential(ACCOUNT_TOKEN_KEY, token.clone());
    }

    let root = DirectoryNode::root(crawl.url.clone(), root_name(&crawl.url), crawl.provider_tag()?);
    let report = crawler.crawl(&root, session).await;

    let snapshot = root.snapshot();
    if let Some(path) = &config.output.tree_json {
        write_tree(path, &snapshot).await?;
    }
    if let Some(path) = &config.output.inventory {
        write_inventory(path, &snapshot).await?;
    }
    Ok(report)
}

/// Last non-empty path segment, or the host for bare roots.
fn root_name(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let segment = parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_string);
    segment.unwrap_or_else(|| match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => url.to_string(),
    })
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    Ok(())
}

async fn write_tree(path: &Path, snapshot: &TreeSnapshot) -> Result<()> {
    ensure_parent(path).await?;
    let json = serde_json::to_string_pretty(snapshot).context("Failed to encode tree snapshot")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write tree snapshot {:?}", path))?;
    info!(path = ?path, "Tree snapshot written");
    Ok(())
}

async fn write_inventory(path: &Path, snapshot: &TreeSnapshot) -> Result<()> {
    ensure_parent(path).await?;
    let now = Utc::now();
    let records: Vec<InventoryRecord> = snapshot
        .file_urls()
        .iter()
        .map(|url| InventoryRecord::from_url(url, now))
        .collect();
    let inventory = JsonLinesInventory::open(path).await?;
    let inserted = inventory.upsert(&records).await?;
    info!(path = ?path, discovered = records.len(), inserted, "Inventory written");
    Ok(())
}
