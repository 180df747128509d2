//! E-book library server provider.
//!
//! The server lists its libraries in one call and every book of a library in
//! one more. Nothing below the library level needs network access: each book
//! becomes a node holding a cover and one file per stored format. Those book
//! nodes are built on a bounded pool and arrive already complete, so the
//! driver never visits them again.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{contain, decode_json, sanitize_file_name, ProviderTag};
use crate::contract::{Populate, PopulateOutcome, Transport};
use crate::error::CrawlError;
use crate::pagination::ALL_ITEMS;
use crate::progress::ProgressTracker;
use crate::session::CrawlSession;
use crate::tree::{DirectoryNode, FileEntry};

pub const DEFAULT_MAX_CONCURRENT_ENRICHMENTS: usize = 100;
/// Servers older than this major version expose a different API.
pub const MIN_MAJOR_VERSION: u64 = 3;

const LIBRARY_METADATA_FILE: &str = "LibraryMetadata.json";
const COVER_FILE: &str = "cover.jpg";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_version(s)
    }
}

/// Parses a bare version, `name/version` or `name version`.
///
/// The version is the token after the last `/` when there is one, otherwise
/// after the last space.
pub fn parse_version(raw: &str) -> Result<Version, CrawlError> {
    let trimmed = raw.trim();
    let token = if trimmed.contains('/') {
        trimmed.rsplit('/').next()
    } else {
        trimmed.rsplit(' ').next()
    }
    .unwrap_or(trimmed);

    let invalid = || CrawlError::InvalidVersion(raw.to_string());
    let mut parts = token.split('.');
    let mut component = |required: bool| -> Result<u64, CrawlError> {
        match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid()),
            None if required => Err(invalid()),
            None => Ok(0),
        }
    };
    let version = Version {
        major: component(true)?,
        minor: component(false)?,
        patch: component(false)?,
    };
    // A fourth (build) component is accepted and ignored.
    if parts.clone().count() > 1 || parts.any(|p| p.parse::<u64>().is_err()) {
        return Err(invalid());
    }
    Ok(version)
}

/// Normalizes a node URL to the server root: no query, no fragment, trailing `/`.
pub fn root_url(url: &str) -> Result<String, CrawlError> {
    let mut parsed = reqwest::Url::parse(url).map_err(|_| CrawlError::AddressUnparseable {
        provider: "calibre".to_string(),
        url: url.to_string(),
    })?;
    parsed.set_fragment(None);
    parsed.set_query(None);
    if !parsed.path().ends_with('/') {
        let path = format!("{}/", parsed.path());
        parsed.set_path(&path);
    }
    Ok(parsed.to_string())
}

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(default)]
    library_map: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BooksInit {
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Book {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author_sort: String,
    #[serde(default)]
    formats: Vec<String>,
    #[serde(default)]
    format_sizes: HashMap<String, u64>,
}

impl Book {
    fn size_of(&self, format: &str) -> u64 {
        self.format_sizes
            .get(format)
            .or_else(|| self.format_sizes.get(&format.to_uppercase()))
            .copied()
            .unwrap_or(0)
    }
}

/// Identifies one library on one server.
#[derive(Debug, Clone)]
struct LibraryRef {
    root: String,
    id: String,
}

impl LibraryRef {
    fn books_init_url(&self) -> String {
        format!(
            "{}interface-data/books-init?library_id={}&num={}",
            self.root,
            urlencoding::encode(&self.id),
            ALL_ITEMS
        )
    }

    fn node_url(&self) -> String {
        format!("{}#library_id={}&panel=book_list", self.root, self.id)
    }

    fn book_url(&self, book_id: &str) -> String {
        format!(
            "{}#book_id={}&library_id={}&panel=book_list",
            self.root, book_id, self.id
        )
    }

    fn cover_url(&self, book_id: &str) -> String {
        format!("{}get/cover/{}/{}", self.root, book_id, self.id)
    }

    fn format_url(&self, format: &str, book_id: &str) -> String {
        format!(
            "{}get/{}/{}/{}",
            self.root,
            format.to_uppercase(),
            book_id,
            self.id
        )
    }
}

pub struct CalibreProvider {
    transport: Arc<dyn Transport>,
    max_concurrency: usize,
    version: Option<String>,
}

impl CalibreProvider {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            max_concurrency: DEFAULT_MAX_CONCURRENT_ENRICHMENTS,
            version: None,
        }
    }

    /// Upper bound on books enriched at the same time.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Uses `version` instead of asking the server for its `Server` header.
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    /// The server version, or `None` when it cannot be told.
    async fn server_version(
        &self,
        session: &CrawlSession,
        root: &str,
    ) -> Result<Option<Version>, CrawlError> {
        if let Some(configured) = &self.version {
            return parse_version(configured).map(Some);
        }
        let response = session
            .fetch(self.transport.as_ref(), root)
            .await?
            .error_for_status(root)?;
        let Some(header) = response.header("server") else {
            debug!(url = root, "No Server header, assuming a supported version");
            return Ok(None);
        };
        match parse_version(header) {
            Ok(version) => Ok(Some(version)),
            Err(e) => {
                warn!(url = root, server = header, error = %e, "Unrecognised server version");
                Ok(None)
            }
        }
    }

    async fn fetch_body(
        &self,
        session: &CrawlSession,
        node: &DirectoryNode,
        url: &str,
    ) -> Result<String, CrawlError> {
        let response = session.fetch(self.transport.as_ref(), url).await?;
        node.set_populated_successfully(response.is_success());
        Ok(response.error_for_status(url)?.body)
    }

    async fn populate_library(
        &self,
        session: &CrawlSession,
        library: &Arc<DirectoryNode>,
        lib: &LibraryRef,
    ) -> Result<(), CrawlError> {
        info!(library = library.name(), "Retrieving metadata of books");
        let url = lib.books_init_url();
        let body = self.fetch_body(session, library, &url).await?;
        library.add_file(FileEntry::new(
            url.clone(),
            LIBRARY_METADATA_FILE,
            body.len() as u64,
        ));
        let books: BooksInit = decode_json(&url, &body)?;
        info!(
            library = library.name(),
            books = books.metadata.len(),
            "Retrieved metadata of books"
        );
        self.enrich_books(session, library, lib, books.metadata).await
    }

    /// Builds one node per book on a pool of at most `max_concurrency` tasks.
    async fn enrich_books(
        &self,
        session: &CrawlSession,
        library: &Arc<DirectoryNode>,
        lib: &LibraryRef,
        books: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), CrawlError> {
        let progress = ProgressTracker::new(
            format!("Parsing books of library {}", library.name()),
            books.len(),
        );

        let mut results = stream::iter(books)
            .map(|(book_id, value)| {
                let library = library.clone();
                let lib = lib.clone();
                tokio::spawn(async move { build_book(&library, &lib, &book_id, value) })
            })
            .buffer_unordered(self.max_concurrency);

        while let Some(joined) = results.next().await {
            if session.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }
            attach_book(session, library, joined);
            progress.tick();
        }

        info!(
            library = library.name(),
            books = library.child_count(),
            "Parsed info of books"
        );
        Ok(())
    }
}

type BookTask = Result<(Arc<DirectoryNode>, Option<CrawlError>), tokio::task::JoinError>;

/// Attaches a finished book to its library. A book that could not be built is
/// kept as a failed node; a task that died is counted against the library.
fn attach_book(session: &CrawlSession, library: &Arc<DirectoryNode>, joined: BookTask) {
    match joined {
        Ok((book, None)) => library.push_child(book),
        Ok((book, Some(err))) => {
            warn!(url = book.url(), error = %err, "Error processing book");
            if book.mark_failed() {
                session.record_error(book.url());
            }
            library.push_child(book);
        }
        Err(e) => {
            warn!(library = library.name(), error = %e, "Book task aborted");
            session.record_error(library.url());
        }
    }
}

/// Builds the node of one book; the error, if any, is for the caller to record.
fn build_book(
    library: &Arc<DirectoryNode>,
    lib: &LibraryRef,
    book_id: &str,
    value: serde_json::Value,
) -> (Arc<DirectoryNode>, Option<CrawlError>) {
    let url = lib.book_url(book_id);
    let book: Book = match serde_json::from_value(value) {
        Ok(book) => book,
        Err(e) => {
            let node = DirectoryNode::detached_child(library, url, book_id);
            node.mark_complete();
            let err = CrawlError::ItemEnrichment {
                item: book_id.to_string(),
                reason: e.to_string(),
            };
            return (node, Some(err));
        }
    };

    let name = if book.title.is_empty() {
        book_id
    } else {
        book.title.as_str()
    };
    let node = DirectoryNode::detached_child(library, url, name);
    node.add_file(FileEntry::new(lib.cover_url(book_id), COVER_FILE, 0));

    let base_name = format!(
        "{} - {}",
        sanitize_file_name(&book.title),
        sanitize_file_name(&book.author_sort)
    );
    for format in &book.formats {
        node.add_file(FileEntry::new(
            lib.format_url(format, book_id),
            format!("{base_name}.{}", format.to_lowercase()),
            book.size_of(format),
        ));
    }
    node.set_populated_successfully(true);
    node.mark_complete();
    debug!(book = book_id, title = %book.title, "Retrieved info for book");
    (node, None)
}

#[async_trait]
impl Populate for CalibreProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Calibre
    }

    async fn populate(
        &self,
        node: &Arc<DirectoryNode>,
        session: &CrawlSession,
    ) -> Result<PopulateOutcome, CrawlError> {
        node.tag_provider(ProviderTag::Calibre);
        let root = contain(session, node, root_url(node.url()))?;

        let version = contain(session, node, self.server_version(session, &root).await)?;
        if let Some(version) = version.filter(|v| v.major < MIN_MAJOR_VERSION) {
            info!(url = node.url(), %version, "Calibre version is not supported, skipping");
            node.set_populated_successfully(true);
            return Ok(PopulateOutcome::Skipped {
                reason: format!("calibre {version} is not supported"),
            });
        }

        info!(url = node.url(), "Retrieving libraries");
        let update_url = format!("{root}interface-data/update");
        let body = contain(
            session,
            node,
            self.fetch_body(session, node, &update_url).await,
        )?;
        let update: Update = contain(session, node, decode_json(&update_url, &body))?;
        info!(libraries = update.library_map.len(), "Retrieved libraries");

        let mut failed_libraries = 0;
        for (id, name) in update.library_map {
            if session.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }
            let name = match name {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            let lib = LibraryRef {
                root: root.clone(),
                id,
            };
            let library = node.add_child(lib.node_url(), name);
            library.mark_complete();

            match self.populate_library(session, &library, &lib).await {
                Ok(()) => {}
                Err(CrawlError::Cancelled) => return Err(CrawlError::Cancelled),
                Err(e) => {
                    session.record_node_failure(&library, &e);
                    failed_libraries += 1;
                }
            }
        }

        Ok(PopulateOutcome::Populated {
            failed_passes: failed_libraries,
        })
    }
}
