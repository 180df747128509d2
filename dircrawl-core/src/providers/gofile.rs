//! File-locker provider.
//!
//! Listing calls need an account token. When the session holds none, an
//! anonymous account is created once per crawl and its token reused by every
//! node afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{contain, decode_json, lenient_size, ProviderTag};
use crate::contract::{Populate, PopulateOutcome, Transport};
use crate::error::CrawlError;
use crate::identifier::IdExtractor;
use crate::session::CrawlSession;
use crate::tree::{DirectoryNode, FileEntry};

pub const DEFAULT_API_BASE: &str = "https://api.gofile.io";
/// Session key of the anonymous account token.
pub const ACCOUNT_TOKEN_KEY: &str = "GoFileIOAccountToken";
const FOLDER_BASE_URL: &str = "https://gofile.io/d";
const WEBSITE_TOKEN: &str = "12345";
const STATUS_OK: &str = "ok";
const FOLDER_TYPE: &str = "folder";

const FOLDER_HASH_PATTERNS: [&str; 1] = [r".*?/d/(?P<id>.*)"];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct AccountData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ContentData {
    #[serde(default)]
    contents: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default, deserialize_with = "lenient_size")]
    size: u64,
    #[serde(rename = "directLink", alias = "link", default)]
    direct_link: Option<String>,
}

pub struct GoFileProvider {
    transport: Arc<dyn Transport>,
    api_base: String,
    ids: IdExtractor,
}

impl GoFileProvider {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            api_base: DEFAULT_API_BASE.to_string(),
            ids: IdExtractor::new("gofile", &FOLDER_HASH_PATTERNS)
                .expect("folder hash pattern is valid"),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn folder_hash(&self, url: &str) -> Result<String, CrawlError> {
        self.ids.extract(url)
    }

    pub fn folder_url(folder_hash: &str) -> String {
        format!("{FOLDER_BASE_URL}/{folder_hash}")
    }

    pub fn listing_url(&self, folder_hash: &str, token: &str) -> String {
        format!(
            "{}/getContent?contentId={}&token={}&websiteToken={}",
            self.api_base,
            urlencoding::encode(folder_hash),
            urlencoding::encode(token),
            WEBSITE_TOKEN
        )
    }

    async fn create_account(&self, session: &CrawlSession) -> Result<String, CrawlError> {
        info!("gofile creating temporary account");
        let url = format!("{}/createAccount", self.api_base);
        let failed = |reason: String| CrawlError::CredentialAcquisitionFailed {
            key: ACCOUNT_TOKEN_KEY.to_string(),
            reason,
        };

        let response = match session.fetch(self.transport.as_ref(), &url).await {
            Ok(r) => r,
            Err(CrawlError::Cancelled) => return Err(CrawlError::Cancelled),
            Err(e) => return Err(failed(e.to_string())),
        };
        let response = response
            .error_for_status(&url)
            .map_err(|e| failed(e.to_string()))?;
        let account: Envelope<AccountData> =
            decode_json(&url, &response.body).map_err(|e| failed(e.to_string()))?;
        if account.status != STATUS_OK {
            return Err(failed(format!("Error creating account: {}", account.status)));
        }
        account
            .data
            .map(|d| d.token)
            .ok_or_else(|| failed("account response carried no token".to_string()))
    }

    async fn fetch_listing(
        &self,
        session: &CrawlSession,
        node: &DirectoryNode,
        url: &str,
    ) -> Result<ContentData, CrawlError> {
        debug!(url = node.url(), "Retrieving listing");
        let response = session.fetch(self.transport.as_ref(), url).await?;
        node.set_populated_successfully(response.is_success());
        let response = response.error_for_status(url)?;

        let listing: Envelope<ContentData> = decode_json(url, &response.body)?;
        if listing.status != STATUS_OK {
            return Err(CrawlError::ProviderStatus {
                url: url.to_string(),
                status: listing.status,
            });
        }
        listing
            .data
            .ok_or_else(|| CrawlError::decode(url, "listing response carried no data"))
    }
}

fn add_contents(node: &Arc<DirectoryNode>, data: ContentData) {
    for (key, value) in data.contents {
        let entry: Content = match serde_json::from_value(value) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(url = node.url(), entry = %key, error = %e, "Skipping undecodable entry");
                continue;
            }
        };
        if entry.kind == FOLDER_TYPE {
            let id = entry.id.unwrap_or(key);
            node.add_child(GoFileProvider::folder_url(&id), entry.name);
        } else {
            match entry.direct_link {
                Some(link) => node.add_file(FileEntry::new(link, entry.name, entry.size)),
                None => warn!(url = node.url(), file = %entry.name, "File entry without link, skipping"),
            }
        }
    }
}

#[async_trait]
impl Populate for GoFileProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::GoFile
    }

    async fn populate(
        &self,
        node: &Arc<DirectoryNode>,
        session: &CrawlSession,
    ) -> Result<PopulateOutcome, CrawlError> {
        node.tag_provider(ProviderTag::GoFile);
        let folder_hash = contain(session, node, self.folder_hash(node.url()))?;

        let token = session
            .credential_or_acquire(ACCOUNT_TOKEN_KEY, move || self.create_account(session))
            .await;
        let token = contain(session, node, token)?;

        let url = self.listing_url(&folder_hash, &token);
        let data = contain(session, node, self.fetch_listing(session, node, &url).await)?;
        add_contents(node, data);

        debug!(
            url = node.url(),
            folders = node.child_count(),
            files = node.file_count(),
            "Listing complete"
        );
        Ok(PopulateOutcome::Populated { failed_passes: 0 })
    }
}
