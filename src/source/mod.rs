// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod feed;
mod wordpress;

use async_trait::async_trait;

use crate::error::FetchError;

pub use feed::{FeedFetcher, parse_feed_entries};
pub use wordpress::{WordPressFetcher, parse_posts_page};

/// The audio file attached to a raw entry, when the source provides one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub length: Option<u64>,
}

/// One unprocessed entry as delivered by a content source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    /// Title; encodes the sequence number after the show name
    pub title: String,
    /// Publish timestamp as written by the source
    pub published: Option<String>,
    /// Link to the entry's own page, if the source has one
    pub link: Option<String>,
    /// Markup or text body
    pub body: String,
    pub enclosure: Option<Enclosure>,
}

/// Paginated retrieval of raw entries, newest first
///
/// Pages are 1-based. An empty page means the source is exhausted.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch_page(&self, page: u32) -> Result<Vec<RawEntry>, FetchError>;
}
