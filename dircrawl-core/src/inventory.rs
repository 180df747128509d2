//! Site inventory: one record per discovered file URL, keyed by URL.
//!
//! [`JsonLinesInventory`] stores records as JSON lines. URLs already present
//! in the file are skipped, so repeated crawls only append what is new.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::contract::InventorySink;
use crate::error::InventoryError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub url: String,
    pub file_name: String,
    pub file_extension: String,
    pub last_modified: DateTime<Utc>,
}

impl InventoryRecord {
    pub fn from_url(url: &str, now: DateTime<Utc>) -> Self {
        let file_name = file_name_of(url);
        let file_extension = normalize_extension(extension_of(&file_name));
        Self {
            url: url.to_string(),
            file_name,
            file_extension,
            last_modified: now,
        }
    }
}

/// Last path segment of the URL, percent-decoded. Query and fragment are ignored.
fn file_name_of(url: &str) -> String {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    let segment = path.rsplit('/').next().unwrap_or_default();
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

/// The extension including its dot, or an empty string.
fn extension_of(file_name: &str) -> &str {
    match file_name.rfind('.') {
        Some(0) | None => "",
        Some(i) => &file_name[i..],
    }
}

/// Lowercases and strips trailing characters that are not `a-z` or `0-9`.
pub fn normalize_extension(extension: &str) -> String {
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    let trailing = TRAILING.get_or_init(|| Regex::new(r"[^a-z0-9]+$").expect("valid pattern"));
    trailing
        .replace(&extension.to_lowercase(), "")
        .into_owned()
}

/// Append-only JSON lines file deduplicated by URL.
pub struct JsonLinesInventory {
    path: PathBuf,
    known: Mutex<HashSet<String>>,
}

impl JsonLinesInventory {
    /// Opens `path`, loading the URLs it already holds. A missing file is empty.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, InventoryError> {
        let path = path.as_ref().to_path_buf();
        let mut known = HashSet::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (line_no, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<InventoryRecord>(line) {
                        Ok(record) => {
                            known.insert(record.url);
                        }
                        Err(e) => warn!(
                            path = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "Skipping malformed inventory line"
                        ),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(InventoryError::Io {
                    path: path.display().to_string(),
                    source,
                })
            }
        }
        debug!(path = %path.display(), records = known.len(), "Inventory opened");
        Ok(Self {
            path,
            known: Mutex::new(known),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record_count(&self) -> usize {
        self.known.lock().await.len()
    }

    fn io_error(&self, source: std::io::Error) -> InventoryError {
        InventoryError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[async_trait]
impl InventorySink for JsonLinesInventory {
    async fn upsert(&self, records: &[InventoryRecord]) -> Result<usize, InventoryError> {
        let mut known = self.known.lock().await;

        let mut buffer = String::new();
        let mut added: HashSet<&str> = HashSet::new();
        for record in records {
            if known.contains(&record.url) || !added.insert(record.url.as_str()) {
                continue;
            }
            buffer.push_str(&serde_json::to_string(record)?);
            buffer.push('\n');
        }
        if added.is_empty() {
            return Ok(0);
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(buffer.as_bytes())
            .await
            .map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))?;

        let inserted = added.len();
        known.extend(added.into_iter().map(str::to_string));
        info!(path = %self.path.display(), inserted, "Inventory updated");
        Ok(inserted)
    }
}
