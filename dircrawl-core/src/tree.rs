//! # tree: the normalized directory tree
//!
//! Every provider populates the same two structures:
//! - [`DirectoryNode`]: a directory-like position in a provider's namespace
//! - [`FileEntry`]: a single downloadable resource owned by exactly one node
//!
//! ## Ownership
//! Parents own their children through `Arc`; a child only holds a `Weak` pointer
//! back to its parent. The parent pointer is read-only and is used for context
//! lookups (e.g. the provider tag), never for ownership, so the structure stays a
//! tree without reference cycles.
//!
//! ## Mutation
//! After construction a node only changes by appending to `children`/`files`
//! and by the one-time flip of its status flags. Appends go through a lock, so
//! a bounded-parallel fan-out can hand finished children to the parent safely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::providers::ProviderTag;

/// A single downloadable resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub url: String,
    pub file_name: String,
    /// Size in bytes; 0 means unknown.
    pub size_bytes: u64,
}

impl FileEntry {
    pub fn new(url: impl Into<String>, file_name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            url: url.into(),
            file_name: file_name.into(),
            size_bytes,
        }
    }
}

#[derive(Debug)]
pub struct DirectoryNode {
    url: String,
    name: String,
    provider: OnceLock<ProviderTag>,
    parent: Weak<DirectoryNode>,
    children: Mutex<Vec<Arc<DirectoryNode>>>,
    files: Mutex<Vec<FileEntry>>,
    failed: AtomicBool,
    populated_successfully: AtomicBool,
    complete: AtomicBool,
}

impl DirectoryNode {
    fn build(
        url: String,
        name: String,
        provider: Option<ProviderTag>,
        parent: Weak<DirectoryNode>,
    ) -> Self {
        debug_assert!(!url.is_empty(), "directory node url must not be empty");
        let tag = OnceLock::new();
        if let Some(p) = provider {
            let _ = tag.set(p);
        }
        Self {
            url,
            name,
            provider: tag,
            parent,
            children: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            failed: AtomicBool::new(false),
            populated_successfully: AtomicBool::new(false),
            complete: AtomicBool::new(false),
        }
    }

    /// Creates the root of a crawl. The provider may be left open and tagged later.
    pub fn root(
        url: impl Into<String>,
        name: impl Into<String>,
        provider: Option<ProviderTag>,
    ) -> Arc<Self> {
        Arc::new(Self::build(url.into(), name.into(), provider, Weak::new()))
    }

    /// Builds a child of `parent` without attaching it yet.
    ///
    /// The child inherits the parent's provider tag. Attach it with
    /// [`DirectoryNode::push_child`] once it is fully built.
    pub fn detached_child(
        parent: &Arc<DirectoryNode>,
        url: impl Into<String>,
        name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self::build(
            url.into(),
            name.into(),
            parent.provider(),
            Arc::downgrade(parent),
        ))
    }

    /// Creates a child of `self` and appends it in one step.
    pub fn add_child(
        self: &Arc<Self>,
        url: impl Into<String>,
        name: impl Into<String>,
    ) -> Arc<DirectoryNode> {
        let child = Self::detached_child(self, url, name);
        self.push_child(child.clone());
        child
    }

    pub fn push_child(&self, child: Arc<DirectoryNode>) {
        debug_assert!(
            child
                .parent
                .upgrade()
                .is_some_and(|p| std::ptr::eq(Arc::as_ptr(&p), self)),
            "child must be built against this parent"
        );
        self.children.lock().push(child);
    }

    pub fn add_file(&self, file: FileEntry) {
        self.files.lock().push(file);
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The provider that populates this node, falling back to the nearest tagged ancestor.
    pub fn provider(&self) -> Option<ProviderTag> {
        if let Some(tag) = self.provider.get() {
            return Some(*tag);
        }
        self.parent().and_then(|p| p.provider())
    }

    /// Tags the node with its provider. The first tag wins.
    pub fn tag_provider(&self, provider: ProviderTag) {
        let _ = self.provider.set(provider);
    }

    pub fn parent(&self) -> Option<Arc<DirectoryNode>> {
        self.parent.upgrade()
    }

    pub fn children(&self) -> Vec<Arc<DirectoryNode>> {
        self.children.lock().clone()
    }

    pub fn files(&self) -> Vec<FileEntry> {
        self.files.lock().clone()
    }

    pub fn child_count(&self) -> usize {
        self.children.lock().len()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Flags the node as failed. Returns `true` only for the call that flipped the flag.
    pub fn mark_failed(&self) -> bool {
        !self.failed.swap(true, Ordering::SeqCst)
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Records the outcome of the node's listing call.
    pub fn set_populated_successfully(&self, ok: bool) {
        self.populated_successfully.store(ok, Ordering::SeqCst);
    }

    pub fn populated_successfully(&self) -> bool {
        self.populated_successfully.load(Ordering::SeqCst)
    }

    /// Marks the node as needing no further population (its content was built in place).
    pub fn mark_complete(&self) {
        self.complete.store(true, Ordering::SeqCst);
    }

    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::SeqCst)
    }

    /// Copies the subtree into a plain, serializable value.
    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            url: self.url.clone(),
            name: self.name.clone(),
            provider: self.provider(),
            failed: self.is_failed(),
            populated_successfully: self.populated_successfully(),
            files: self.files(),
            children: self.children().iter().map(|c| c.snapshot()).collect(),
        }
    }
}

/// Owned copy of a subtree, used for reporting and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub url: String,
    pub name: String,
    pub provider: Option<ProviderTag>,
    pub failed: bool,
    pub populated_successfully: bool,
    pub files: Vec<FileEntry>,
    pub children: Vec<TreeSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub directories: usize,
    pub files: usize,
    pub total_bytes: u64,
    pub failed_directories: usize,
}

impl TreeSnapshot {
    /// Counts the subtree, the root directory included.
    pub fn stats(&self) -> TreeStats {
        let mut stats = TreeStats {
            directories: 1,
            files: self.files.len(),
            total_bytes: self.files.iter().map(|f| f.size_bytes).sum(),
            failed_directories: usize::from(self.failed),
        };
        for child in &self.children {
            let c = child.stats();
            stats.directories += c.directories;
            stats.files += c.files;
            stats.total_bytes += c.total_bytes;
            stats.failed_directories += c.failed_directories;
        }
        stats
    }

    /// All file URLs in depth-first order.
    pub fn file_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.files.iter().map(|f| f.url.clone()).collect();
        for child in &self.children {
            urls.extend(child.file_urls());
        }
        urls
    }
}
