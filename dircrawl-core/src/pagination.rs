//! Chunked listing engine.
//!
//! Providers fall in three groups:
//! - single-page: one call with [`ALL_ITEMS`] as page size, complete in one step
//! - chunked: chunk `1..=k`, continuing while the provider says more follows
//! - typed multi-pass: one independent chunked pass per listing category
//!
//! [`drain_chunks`] implements the chunked loop; multi-pass providers call it
//! once per category. Items are handed to the sink in chunk order.

use std::future::Future;

use crate::error::CrawlError;

/// Chunk numbering is 1-based.
pub const FIRST_CHUNK: u32 = 1;

/// Page size used to ask single-page providers for everything at once.
pub const ALL_ITEMS: u64 = 999_999_999;

/// One decoded chunk of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    pub items: T,
    /// The provider announced that another chunk follows.
    pub more: bool,
}

/// A pass that stopped at `chunk`; chunks before it were already delivered.
#[derive(Debug, Clone, PartialEq)]
pub struct PassFailure {
    pub chunk: u32,
    pub error: CrawlError,
}

/// Requests chunk 1, 2, ... until a chunk comes back without the "more" flag.
///
/// Returns the number of chunks consumed. The first failing chunk ends the pass.
pub async fn drain_chunks<T, F, Fut, S>(mut fetch: F, mut sink: S) -> Result<u32, PassFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Chunk<T>, CrawlError>>,
    S: FnMut(u32, T),
{
    let mut chunk = FIRST_CHUNK;
    loop {
        let page = fetch(chunk)
            .await
            .map_err(|error| PassFailure { chunk, error })?;
        sink(chunk, page.items);
        if !page.more {
            return Ok(chunk);
        }
        chunk += 1;
    }
}
