// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::http::HttpClient;
use crate::retry::{AttemptError, RetryPolicy};

use super::{ContentFetcher, Enclosure, RawEntry};

#[derive(Debug, Deserialize)]
struct PostsPage {
    #[serde(default)]
    posts: Vec<Post>,
}

#[derive(Debug, Deserialize)]
struct Post {
    title: String,
    date: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: HashMap<String, Attachment>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    #[serde(rename = "URL")]
    url: String,
    #[serde(default)]
    mime_type: String,
}

/// Fetches posts from the WordPress.com REST API (`/sites/<site>/posts`)
pub struct WordPressFetcher<C: HttpClient> {
    client: C,
    base_url: Url,
    page_size: u32,
    retry: RetryPolicy,
}

impl<C: HttpClient> WordPressFetcher<C> {
    /// `base_url` is the site endpoint, e.g.
    /// `https://public-api.wordpress.com/rest/v1.2/sites/popcastingpop.com`
    pub fn new(client: C, base_url: &str, page_size: u32, retry: RetryPolicy) -> Result<Self, FetchError> {
        Ok(Self {
            client,
            base_url: Url::parse(base_url.trim_end_matches('/'))?,
            page_size,
            retry,
        })
    }

    fn page_url(&self, page: u32) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push("posts");
        }
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("number", &self.page_size.to_string())
            .append_pair("order_by", "date")
            .append_pair("order", "DESC");
        url.to_string()
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<RawEntry>, FetchError> {
        let response = self
            .client
            .get_bytes(url)
            .await
            .map_err(|e| FetchError::RequestFailed {
                url: url.to_string(),
                source: e,
            })?;

        if response.status >= 400 {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status,
            });
        }

        parse_posts_page(&response.body).map_err(|reason| FetchError::InvalidResponse {
            url: url.to_string(),
            reason,
        })
    }
}

#[async_trait]
impl<C: HttpClient> ContentFetcher for WordPressFetcher<C> {
    async fn fetch_page(&self, page: u32) -> Result<Vec<RawEntry>, FetchError> {
        let url = self.page_url(page);
        debug!(page, url = %url, "fetching posts page");

        self.retry
            .run("page fetch", FetchError::is_retryable, || self.fetch_once(&url))
            .await
            .map_err(|e| match e {
                AttemptError::Failed(e) => e,
                AttemptError::TimedOut => FetchError::TimedOut {
                    url: url.clone(),
                    timeout: self.retry.timeout,
                },
            })
    }
}

/// Decode one `/posts` response into raw entries
pub fn parse_posts_page(bytes: &[u8]) -> Result<Vec<RawEntry>, String> {
    let page: PostsPage = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;

    Ok(page.posts.into_iter().map(post_to_entry).collect())
}

fn post_to_entry(post: Post) -> RawEntry {
    let mut audio: Vec<&Attachment> = post
        .attachments
        .values()
        .filter(|a| a.mime_type.starts_with("audio/"))
        .collect();
    // HashMap order is arbitrary; keep the choice stable across runs
    audio.sort_by(|a, b| a.url.cmp(&b.url));

    RawEntry {
        title: post.title,
        published: post.date,
        link: post.url,
        body: post.content,
        enclosure: audio.first().map(|a| Enclosure {
            url: a.url.clone(),
            length: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::http::{HttpBody, HttpResponse};
    use bytes::Bytes;
    use std::sync::Mutex;
    use std::time::Duration;

    const SAMPLE_PAGE: &str = r#"{
      "found": 2,
      "posts": [
        {
          "ID": 9001,
          "title": "Popcasting486",
          "date": "2025-07-18T10:00:00+02:00",
          "URL": "https://popcastingpop.com/2025/07/18/popcasting486/",
          "content": "<p>The Clean · Tally Ho :: Pavement · Cut Your Hair</p>",
          "attachments": {
            "77": {"URL": "https://popcastingpop.com/wp-content/uploads/2025/07/486.png", "mime_type": "image/png"},
            "78": {"URL": "https://www.ivoox.com/popcasting486_md_1_1.mp3", "mime_type": "audio/mpeg"}
          }
        },
        {
          "ID": 9000,
          "title": "Popcasting485",
          "URL": "https://popcastingpop.com/2025/07/04/popcasting485/",
          "content": ""
        }
      ]
    }"#;

    struct MockHttpClient {
        status: u16,
        body: String,
        requested: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn get_bytes(&self, url: &str) -> Result<HttpBody, reqwest::Error> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(HttpBody {
                status: self.status,
                body: Bytes::from(self.body.clone()),
            })
        }

        async fn get_stream(&self, _url: &str) -> Result<HttpResponse, reqwest::Error> {
            unimplemented!("pages are fetched whole")
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(2, Duration::from_secs(5), Duration::from_millis(1))
    }

    #[test]
    fn parse_posts_page_maps_fields() {
        let entries = parse_posts_page(SAMPLE_PAGE.as_bytes()).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "Popcasting486");
        assert_eq!(entries[0].published.as_deref(), Some("2025-07-18T10:00:00+02:00"));
        assert_eq!(
            entries[0].link.as_deref(),
            Some("https://popcastingpop.com/2025/07/18/popcasting486/")
        );
        assert_eq!(
            entries[0].enclosure.as_ref().map(|e| e.url.as_str()),
            Some("https://www.ivoox.com/popcasting486_md_1_1.mp3")
        );
        assert!(entries[1].enclosure.is_none());
        assert!(entries[1].published.is_none());
    }

    #[test]
    fn parse_posts_page_rejects_garbage() {
        assert!(parse_posts_page(b"<html>").is_err());
    }

    #[tokio::test]
    async fn fetch_page_builds_paginated_url() {
        let client = MockHttpClient {
            status: 200,
            body: SAMPLE_PAGE.to_string(),
            requested: Mutex::new(Vec::new()),
        };
        let fetcher = WordPressFetcher::new(
            client,
            "https://public-api.wordpress.com/rest/v1.2/sites/popcastingpop.com/",
            20,
            policy(),
        )
        .unwrap();

        let entries = fetcher.fetch_page(3).await.unwrap();
        assert_eq!(entries.len(), 2);

        let requested = fetcher.client.requested.lock().unwrap().clone();
        assert_eq!(requested.len(), 1);
        assert!(requested[0].starts_with(
            "https://public-api.wordpress.com/rest/v1.2/sites/popcastingpop.com/posts?"
        ));
        assert!(requested[0].contains("page=3"));
        assert!(requested[0].contains("number=20"));
    }

    #[tokio::test]
    async fn fetch_page_reports_http_errors_without_retrying_client_errors() {
        let client = MockHttpClient {
            status: 404,
            body: String::new(),
            requested: Mutex::new(Vec::new()),
        };
        let fetcher = WordPressFetcher::new(client, "https://example.com/sites/x", 20, policy()).unwrap();

        let result = fetcher.fetch_page(1).await;

        assert!(matches!(result, Err(FetchError::HttpStatus { status: 404, .. })));
        assert_eq!(fetcher.client.requested.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fetch_page_retries_server_errors() {
        let client = MockHttpClient {
            status: 503,
            body: String::new(),
            requested: Mutex::new(Vec::new()),
        };
        let fetcher = WordPressFetcher::new(client, "https://example.com/sites/x", 20, policy()).unwrap();

        let result = fetcher.fetch_page(1).await;

        assert!(matches!(result, Err(FetchError::HttpStatus { status: 503, .. })));
        assert_eq!(fetcher.client.requested.lock().unwrap().len(), 2);
    }
}
