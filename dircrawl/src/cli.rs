/// # dircrawl CLI Interface (Module)
///
/// Command parsing and the async entrypoint of the `dircrawl` binary.
///
/// All crawling logic (tree model, providers, driver, inventory) lives in the
/// [`dircrawl-core`] crate. This module only loads configuration, wires the
/// core together and prints the outcome.
///
/// ## How To Use
/// - From the shell: `dircrawl crawl --config crawl.yaml [--url <root>]`.
/// - Programmatically (tests): call [`run`] with a constructed [`Cli`].
///
/// [`dircrawl-core`]: ../../dircrawl-core/
use crate::crawl::execute;
use crate::load_config::load_config;
use anyhow::Result;
use clap::{Parser, Subcommand};
use dircrawl_core::crawl::CrawlReport;
use dircrawl_core::session::CrawlSession;
use std::path::PathBuf;

/// CLI for dircrawl: index remote file repositories into one directory tree.
#[derive(Parser)]
#[clap(
    name = "dircrawl",
    version,
    about = "Crawl e-book servers, file lockers and cloud drives into a normalized directory tree"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl the root configured in the given config file
    Crawl {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Root URL to crawl instead of `crawl.url` from the config
        #[clap(long)]
        url: Option<String>,
    },
}

/// Async CLI entrypoint for integration tests and main().
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Crawl { config, url } => {
            let mut config = load_config(config)?;
            if let Some(url) = url {
                config.crawl.url = url;
            }
            tracing::info!(command = "crawl", url = %config.crawl.url, "Starting crawl");

            let session = CrawlSession::new();
            let token = session.cancellation_token();
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received, cancelling crawl");
                    token.cancel();
                }
            });

            let result = execute(&config, &session).await;
            ctrl_c.abort();
            let report = result?;
            print_summary(&report);
            tracing::info!(command = "crawl", ?report, "Crawl complete");
            Ok(())
        }
    }
}

fn print_summary(report: &CrawlReport) {
    println!(
        "Crawl {}: {} directories, {} files, {} bytes, {} errors",
        if report.cancelled { "cancelled" } else { "finished" },
        report.directories,
        report.files,
        report.total_bytes,
        report.error_count
    );
    for url in &report.error_urls {
        println!("  failed: {url}");
    }
}
