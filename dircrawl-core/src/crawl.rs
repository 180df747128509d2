//! Traversal driver.
//!
//! Walks the tree breadth-first. Every level is populated concurrently, capped
//! by a semaphore, and the children appended by that level form the next one.
//! A node whose populate call returns an error is abandoned with its subtree.
//! A node that was listed with failed passes keeps its flag but is still
//! descended into. The crawl itself only stops early on cancellation.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::contract::PopulateOutcome;
use crate::error::CrawlError;
use crate::providers::ProviderRegistry;
use crate::session::CrawlSession;
use crate::tree::DirectoryNode;

pub const DEFAULT_MAX_CONCURRENT_NODES: usize = 8;

/// Summary of a finished (or cancelled) crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub directories: usize,
    pub files: usize,
    pub total_bytes: u64,
    pub error_count: u64,
    pub error_urls: Vec<String>,
    pub cancelled: bool,
}

pub struct Crawler {
    registry: ProviderRegistry,
    max_concurrent_nodes: usize,
}

impl Crawler {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            max_concurrent_nodes: DEFAULT_MAX_CONCURRENT_NODES,
        }
    }

    pub fn with_max_concurrent_nodes(mut self, max_concurrent_nodes: usize) -> Self {
        self.max_concurrent_nodes = max_concurrent_nodes.max(1);
        self
    }

    pub async fn crawl(&self, root: &Arc<DirectoryNode>, session: &CrawlSession) -> CrawlReport {
        info!(url = root.url(), "Starting crawl");
        let semaphore = Semaphore::new(self.max_concurrent_nodes);
        let mut level = pending(root);
        let mut depth = 0usize;

        while !level.is_empty() {
            if session.is_cancelled() {
                warn!(depth, pending = level.len(), "Crawl cancelled");
                break;
            }
            debug!(depth, nodes = level.len(), "Populating level");
            join_all(level.iter().map(|node| self.visit(node, session, &semaphore))).await;

            level = level.iter().flat_map(|node| pending_children(node)).collect();
            depth += 1;
        }

        let stats = root.snapshot().stats();
        let report = CrawlReport {
            directories: stats.directories,
            files: stats.files,
            total_bytes: stats.total_bytes,
            error_count: session.error_count(),
            error_urls: session.error_urls(),
            cancelled: session.is_cancelled(),
        };
        info!(
            directories = report.directories,
            files = report.files,
            errors = report.error_count,
            cancelled = report.cancelled,
            "Crawl finished"
        );
        report
    }

    async fn visit(&self, node: &Arc<DirectoryNode>, session: &CrawlSession, semaphore: &Semaphore) {
        let Ok(_permit) = semaphore.acquire().await else {
            return;
        };
        if session.is_cancelled() {
            return;
        }

        let provider = match self.registry.resolve(node) {
            Ok(provider) => provider,
            Err(e) => {
                session.record_node_failure(node, &e);
                return;
            }
        };

        match provider.populate(node, session).await {
            Ok(PopulateOutcome::Populated { failed_passes }) => {
                if failed_passes > 0 {
                    warn!(url = node.url(), failed_passes, "Directory partially listed");
                }
                node.mark_complete();
            }
            Ok(PopulateOutcome::Skipped { reason }) => {
                info!(url = node.url(), reason, "Directory skipped");
                node.mark_complete();
            }
            Err(CrawlError::Cancelled) => {
                debug!(url = node.url(), "Population cancelled");
            }
            Err(e) => {
                debug!(url = node.url(), error = %e, "Subtree abandoned");
            }
        }
    }
}

/// `node` itself when it still needs populating, otherwise its pending descendants.
fn pending(node: &Arc<DirectoryNode>) -> Vec<Arc<DirectoryNode>> {
    if node.is_complete() {
        pending_children(node)
    } else {
        vec![node.clone()]
    }
}

/// Children still to visit; none when `node` itself was abandoned.
fn pending_children(node: &Arc<DirectoryNode>) -> Vec<Arc<DirectoryNode>> {
    if !node.is_complete() {
        return Vec::new();
    }
    node.children().iter().flat_map(pending).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockPopulate;
    use crate::providers::ProviderTag;
    use parking_lot::Mutex;

    fn registry_with(provider: MockPopulate) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(provider));
        registry
    }

    #[tokio::test]
    async fn visits_levels_in_order() {
        let visited = Arc::new(Mutex::new(Vec::new()));
        let log = visited.clone();

        let mut provider = MockPopulate::new();
        provider.expect_tag().return_const(ProviderTag::GoFile);
        provider.expect_populate().times(4).returning(move |node, _| {
            log.lock().push(node.url().to_string());
            if node.url() == "https://gofile.io/d/root" {
                node.add_child("https://gofile.io/d/a", "a");
                node.add_child("https://gofile.io/d/b", "b");
            } else if node.url() == "https://gofile.io/d/a" {
                node.add_child("https://gofile.io/d/a1", "a1");
            }
            Ok(PopulateOutcome::Populated { failed_passes: 0 })
        });

        let crawler = Crawler::new(registry_with(provider)).with_max_concurrent_nodes(1);
        let session = CrawlSession::new();
        let root = DirectoryNode::root("https://gofile.io/d/root", "root", None);

        let report = crawler.crawl(&root, &session).await;

        assert_eq!(
            *visited.lock(),
            vec![
                "https://gofile.io/d/root",
                "https://gofile.io/d/a",
                "https://gofile.io/d/b",
                "https://gofile.io/d/a1",
            ]
        );
        assert_eq!(report.directories, 4);
        assert_eq!(report.error_count, 0);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn failed_node_does_not_stop_siblings() {
        let mut provider = MockPopulate::new();
        provider.expect_tag().return_const(ProviderTag::GoFile);
        provider.expect_populate().returning(|node, session| {
            match node.url() {
                "https://gofile.io/d/root" => {
                    node.add_child("https://gofile.io/d/bad", "bad");
                    node.add_child("https://gofile.io/d/good", "good");
                }
                "https://gofile.io/d/bad" => {
                    let err = CrawlError::HttpStatus {
                        url: node.url().to_string(),
                        status: 500,
                    };
                    session.record_node_failure(node, &err);
                    return Err(err);
                }
                _ => node.add_file(crate::tree::FileEntry::new("https://x/f", "f", 3)),
            }
            Ok(PopulateOutcome::Populated { failed_passes: 0 })
        });

        let crawler = Crawler::new(registry_with(provider));
        let session = CrawlSession::new();
        let root = DirectoryNode::root("https://gofile.io/d/root", "root", None);

        let report = crawler.crawl(&root, &session).await;

        assert_eq!(report.files, 1);
        assert_eq!(report.total_bytes, 3);
        assert_eq!(report.error_count, 1);
        assert_eq!(report.error_urls, vec!["https://gofile.io/d/bad".to_string()]);
        assert!(!root.is_failed());
    }

    #[tokio::test]
    async fn partially_listed_node_is_descended_into() {
        let mut provider = MockPopulate::new();
        provider.expect_tag().return_const(ProviderTag::Mediafire);
        provider.expect_populate().times(2).returning(|node, session| {
            if node.url() == "https://www.mediafire.com/folder/top" {
                node.add_child("https://www.mediafire.com/folder/sub", "sub");
                let err = CrawlError::HttpStatus {
                    url: node.url().to_string(),
                    status: 503,
                };
                session.record_node_failure(node, &err);
                return Ok(PopulateOutcome::Populated { failed_passes: 1 });
            }
            node.add_file(crate::tree::FileEntry::new("https://x/f", "f", 1));
            Ok(PopulateOutcome::Populated { failed_passes: 0 })
        });

        let crawler = Crawler::new(registry_with(provider));
        let session = CrawlSession::new();
        let root = DirectoryNode::root("https://www.mediafire.com/folder/top", "top", None);

        let report = crawler.crawl(&root, &session).await;

        assert!(root.is_failed());
        assert!(root.children()[0].is_complete());
        assert_eq!(report.files, 1);
        assert_eq!(report.error_count, 1);
    }

    #[tokio::test]
    async fn abandoned_node_children_are_not_visited() {
        let mut provider = MockPopulate::new();
        provider.expect_tag().return_const(ProviderTag::GoFile);
        provider.expect_populate().times(1).returning(|node, session| {
            node.add_child("https://gofile.io/d/orphan", "orphan");
            let err = CrawlError::HttpStatus {
                url: node.url().to_string(),
                status: 500,
            };
            session.record_node_failure(node, &err);
            Err(err)
        });

        let crawler = Crawler::new(registry_with(provider));
        let session = CrawlSession::new();
        let root = DirectoryNode::root("https://gofile.io/d/root", "root", None);

        let report = crawler.crawl(&root, &session).await;

        assert!(!root.children()[0].is_complete());
        assert_eq!(report.error_count, 1);
    }

    #[tokio::test]
    async fn complete_nodes_are_not_revisited() {
        let mut provider = MockPopulate::new();
        provider.expect_tag().return_const(ProviderTag::Calibre);
        provider.expect_populate().times(1).returning(|node, _| {
            let library = node.add_child("http://books/#library_id=a", "a");
            library.mark_complete();
            library.add_child("http://books/#book_id=1&library_id=a", "1").mark_complete();
            Ok(PopulateOutcome::Populated { failed_passes: 0 })
        });

        let crawler = Crawler::new(registry_with(provider));
        let session = CrawlSession::new();
        let root = DirectoryNode::root("http://books/", "books", Some(ProviderTag::Calibre));

        let report = crawler.crawl(&root, &session).await;
        assert_eq!(report.directories, 3);
    }

    #[tokio::test]
    async fn unknown_provider_is_recorded() {
        let crawler = Crawler::new(ProviderRegistry::new());
        let session = CrawlSession::new();
        let root = DirectoryNode::root("https://example.org/files/", "files", None);

        let report = crawler.crawl(&root, &session).await;

        assert!(root.is_failed());
        assert_eq!(report.error_urls, vec!["https://example.org/files/".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_session_stops_before_next_level() {
        let mut provider = MockPopulate::new();
        provider.expect_tag().return_const(ProviderTag::GoFile);
        provider.expect_populate().times(1).returning(|node, session| {
            node.add_child("https://gofile.io/d/child", "child");
            session.cancel();
            Ok(PopulateOutcome::Populated { failed_passes: 0 })
        });

        let crawler = Crawler::new(registry_with(provider));
        let session = CrawlSession::new();
        let root = DirectoryNode::root("https://gofile.io/d/root", "root", None);

        let report = crawler.crawl(&root, &session).await;

        assert!(report.cancelled);
        assert_eq!(report.directories, 2);
        assert_eq!(report.error_count, 0);
    }
}
