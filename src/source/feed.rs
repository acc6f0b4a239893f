// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::FetchError;
use crate::http::HttpClient;
use crate::retry::{AttemptError, RetryPolicy};

use super::{ContentFetcher, Enclosure, RawEntry};

enum FeedLocation {
    Remote(String),
    Local(PathBuf),
}

/// Reads a podcast RSS feed; the whole feed is delivered as page 1
pub struct FeedFetcher<C: HttpClient> {
    client: C,
    location: FeedLocation,
    retry: RetryPolicy,
}

impl<C: HttpClient> FeedFetcher<C> {
    /// `source` is either an http(s) URL or a path to a local RSS file
    pub fn new(client: C, source: &str, retry: RetryPolicy) -> Self {
        let location = if is_url(source) {
            FeedLocation::Remote(source.to_string())
        } else {
            FeedLocation::Local(PathBuf::from(source))
        };

        Self {
            client,
            location,
            retry,
        }
    }

    async fn read_bytes(&self) -> Result<Vec<u8>, FetchError> {
        match &self.location {
            FeedLocation::Local(path) => {
                tokio::fs::read(path)
                    .await
                    .map_err(|e| FetchError::InvalidResponse {
                        url: path.display().to_string(),
                        reason: e.to_string(),
                    })
            }
            FeedLocation::Remote(url) => self
                .retry
                .run("feed fetch", FetchError::is_retryable, || {
                    let client = &self.client;
                    let url = url.clone();
                    async move {
                        let response = client.get_bytes(&url).await.map_err(|e| {
                            FetchError::RequestFailed {
                                url: url.clone(),
                                source: e,
                            }
                        })?;
                        if response.status >= 400 {
                            return Err(FetchError::HttpStatus {
                                url,
                                status: response.status,
                            });
                        }
                        Ok(response.body.to_vec())
                    }
                })
                .await
                .map_err(|e| match e {
                    AttemptError::Failed(e) => e,
                    AttemptError::TimedOut => FetchError::TimedOut {
                        url: url.clone(),
                        timeout: self.retry.timeout,
                    },
                }),
        }
    }
}

#[async_trait]
impl<C: HttpClient> ContentFetcher for FeedFetcher<C> {
    async fn fetch_page(&self, page: u32) -> Result<Vec<RawEntry>, FetchError> {
        if page > 1 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes().await?;
        let entries = parse_feed_entries(&bytes)?;
        debug!(entries = entries.len(), "feed parsed");
        Ok(entries)
    }
}

/// Parse RSS feed XML bytes into raw entries, in feed order
pub fn parse_feed_entries(xml_bytes: &[u8]) -> Result<Vec<RawEntry>, FetchError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    Ok(channel.items().iter().map(item_to_entry).collect())
}

fn item_to_entry(item: &rss::Item) -> RawEntry {
    let body = item
        .content()
        .filter(|c| !c.trim().is_empty())
        .or_else(|| item.description())
        .unwrap_or_default()
        .to_string();

    RawEntry {
        title: item.title().unwrap_or_default().to_string(),
        published: item.pub_date().map(String::from),
        link: item.link().map(String::from),
        body,
        enclosure: item.enclosure().map(|enclosure| Enclosure {
            url: enclosure.url().to_string(),
            length: enclosure.length().parse().ok().filter(|len| *len > 0),
        }),
    }
}

/// Determine if a string is a URL or a file path
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}
