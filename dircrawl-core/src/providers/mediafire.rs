//! Cloud-drive provider.
//!
//! A folder is listed in two independent passes, subfolders then files, each
//! chunked: chunk `n` is requested until the response's `more_chunks` is no
//! longer `"yes"`. A failure in the very first call of the node is fatal to the
//! subtree; a failure later on only aborts the pass it occurred in.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{contain, decode_json, lenient_size, ProviderTag};
use crate::contract::{Populate, PopulateOutcome, Transport};
use crate::error::CrawlError;
use crate::identifier::IdExtractor;
use crate::pagination::{drain_chunks, Chunk, FIRST_CHUNK};
use crate::session::CrawlSession;
use crate::tree::{DirectoryNode, FileEntry};

pub const DEFAULT_API_BASE: &str = "https://www.mediafire.com/api/1.4";
const FOLDER_BASE_URL: &str = "https://www.mediafire.com/folder";
const FILE_BASE_URL: &str = "https://www.mediafire.com/file";
const STATUS_SUCCESS: &str = "Success";
const MORE_CHUNKS: &str = "yes";

/// Folder URL shapes, in priority order: `/folder/<key>[/...]` and `/?<key>`.
const FOLDER_ID_PATTERNS: [&str; 2] = [
    r"/folder/(?P<id>[^/]*)(?:/?.*)?",
    r"/\?(?P<id>[^/]*)(?:/?.*)?",
];

/// Listing categories, retrieved in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Folders,
    Files,
}

impl ContentType {
    pub const PASSES: [ContentType; 2] = [ContentType::Folders, ContentType::Files];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Folders => "folders",
            ContentType::Files => "files",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListingResult {
    response: ListingResponse,
}

#[derive(Debug, Deserialize)]
struct ListingResponse {
    result: String,
    #[serde(default)]
    folder_content: Option<FolderContent>,
}

#[derive(Debug, Default, Deserialize)]
struct FolderContent {
    #[serde(default)]
    more_chunks: Option<String>,
    #[serde(default)]
    folders: Option<Vec<Folder>>,
    #[serde(default)]
    files: Option<Vec<File>>,
}

#[derive(Debug, Deserialize)]
struct Folder {
    folderkey: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct File {
    #[serde(default)]
    quickkey: Option<String>,
    #[serde(default)]
    filename: String,
    #[serde(default, deserialize_with = "lenient_size")]
    size: u64,
    #[serde(default)]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    #[serde(default)]
    normal_download: Option<String>,
}

pub struct MediafireProvider {
    transport: Arc<dyn Transport>,
    api_base: String,
    ids: IdExtractor,
}

impl MediafireProvider {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            api_base: DEFAULT_API_BASE.to_string(),
            ids: IdExtractor::new("mediafire", &FOLDER_ID_PATTERNS)
                .expect("folder id patterns are valid"),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn folder_id(&self, url: &str) -> Result<String, CrawlError> {
        self.ids.extract(url)
    }

    pub fn listing_url(&self, folder_id: &str, content_type: ContentType, chunk: u32) -> String {
        format!(
            "{}/folder/get_content.php?content_type={}&filter=all&order_by=name&order_direction=asc&chunk={}&version=1.5&folder_key={}&response_format=json",
            self.api_base,
            content_type.as_str(),
            chunk,
            urlencoding::encode(folder_id)
        )
    }

    pub fn folder_url(folder_key: &str) -> String {
        format!("{FOLDER_BASE_URL}/{folder_key}")
    }

    async fn fetch_chunk(
        &self,
        session: &CrawlSession,
        node: &DirectoryNode,
        folder_id: &str,
        content_type: ContentType,
        chunk: u32,
    ) -> Result<Chunk<FolderContent>, CrawlError> {
        let url = self.listing_url(folder_id, content_type, chunk);
        debug!(
            listing = content_type.as_str(),
            url = node.url(),
            chunk,
            "Retrieving listing"
        );

        let response = session.fetch(self.transport.as_ref(), &url).await?;
        node.set_populated_successfully(response.is_success());
        let response = response.error_for_status(&url)?;

        let listing: ListingResult = decode_json(&url, &response.body)?;
        if listing.response.result != STATUS_SUCCESS {
            return Err(CrawlError::ProviderStatus {
                url,
                status: listing.response.result,
            });
        }
        let content = listing.response.folder_content.unwrap_or_default();
        let more = content.more_chunks.as_deref() == Some(MORE_CHUNKS);
        Ok(Chunk {
            items: content,
            more,
        })
    }
}

fn add_listing(node: &Arc<DirectoryNode>, content: FolderContent) {
    for folder in content.folders.unwrap_or_default() {
        node.add_child(MediafireProvider::folder_url(&folder.folderkey), folder.name);
    }
    for file in content.files.unwrap_or_default() {
        let url = file
            .links
            .and_then(|l| l.normal_download)
            .or_else(|| file.quickkey.map(|key| format!("{FILE_BASE_URL}/{key}")));
        match url {
            Some(url) => node.add_file(FileEntry::new(url, file.filename, file.size)),
            None => warn!(
                url = node.url(),
                file = %file.filename,
                "File entry without download link, skipping"
            ),
        }
    }
}

#[async_trait]
impl Populate for MediafireProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Mediafire
    }

    async fn populate(
        &self,
        node: &Arc<DirectoryNode>,
        session: &CrawlSession,
    ) -> Result<PopulateOutcome, CrawlError> {
        node.tag_provider(ProviderTag::Mediafire);
        let folder_id = contain(session, node, self.folder_id(node.url()))?;
        let folder_id = folder_id.as_str();

        let mut failed_passes = 0;
        for (index, content_type) in ContentType::PASSES.into_iter().enumerate() {
            let pass = drain_chunks(
                move |chunk| self.fetch_chunk(session, node, folder_id, content_type, chunk),
                |_, content| add_listing(node, content),
            )
            .await;

            if let Err(failure) = pass {
                session.record_node_failure(node, &failure.error);
                let first_call = index == 0 && failure.chunk == FIRST_CHUNK;
                if first_call || matches!(failure.error, CrawlError::Cancelled) {
                    return Err(failure.error);
                }
                warn!(
                    url = node.url(),
                    listing = content_type.as_str(),
                    chunk = failure.chunk,
                    "Listing pass aborted"
                );
                failed_passes += 1;
            }
        }

        debug!(
            url = node.url(),
            folders = node.child_count(),
            files = node.file_count(),
            "Listing complete"
        );
        Ok(PopulateOutcome::Populated { failed_passes })
    }
}
