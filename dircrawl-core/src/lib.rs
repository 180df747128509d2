#![doc = "dircrawl-core: provider-agnostic directory-tree crawling."]

//! This crate turns the listing APIs of remote file hosts into one normalized
//! tree of directories and files.
//!
//! - [`tree`]: the shared [`tree::DirectoryNode`] model
//! - [`session`]: crawl-scoped credentials, error accounting and cancellation
//! - [`providers`]: one [`contract::Populate`] implementation per host
//! - [`crawl`]: the breadth-first driver
//! - [`inventory`]: persistence of discovered file URLs
//!
//! # Usage
//! Build a [`providers::ProviderRegistry`] over a [`transport::ReqwestTransport`],
//! hand it to a [`crawl::Crawler`] and crawl a root node with a fresh
//! [`session::CrawlSession`].

pub mod contract;
pub mod crawl;
pub mod error;
pub mod identifier;
pub mod inventory;
pub mod pagination;
pub mod progress;
pub mod providers;
pub mod session;
pub mod transport;
pub mod tree;
