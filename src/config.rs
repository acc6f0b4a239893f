// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use crate::archive::{ArchiveLayout, ArchiveRetries};
use crate::retry::RetryPolicy;
use crate::sync::SyncOptions;

/// Everything a sync run needs that is not a collaborator handle
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Literal prefix that precedes the sequence number in entry titles
    pub show: String,
    /// Entries requested per page from paginated sources
    pub page_size: u32,
    /// Upper bound on pages fetched in one run
    pub max_pages: u32,
    pub workers: usize,
    pub dry_run: bool,
    pub connect_timeout: Duration,
    pub fetch_retry: RetryPolicy,
    pub archive_retries: ArchiveRetries,
    pub layout: ArchiveLayout,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            show: "Popcasting".to_string(),
            page_size: 20,
            max_pages: 10,
            workers: 4,
            dry_run: false,
            connect_timeout: Duration::from_secs(15),
            fetch_retry: RetryPolicy::default(),
            archive_retries: ArchiveRetries::default(),
            layout: ArchiveLayout::default(),
        }
    }
}

impl SyncConfig {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            workers: self.workers.max(1),
            dry_run: self.dry_run,
        }
    }

    /// Use the same attempt count for every network operation
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        let with = |policy: RetryPolicy| RetryPolicy::new(attempts, policy.timeout, policy.backoff);
        self.fetch_retry = with(self.fetch_retry);
        self.archive_retries = ArchiveRetries {
            lookup: with(self.archive_retries.lookup),
            download: with(self.archive_retries.download),
            upload: with(self.archive_retries.upload),
        };
        self
    }

    /// Per-attempt limit for audio transfers
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        let download = self.archive_retries.download;
        let upload = self.archive_retries.upload;
        self.archive_retries.download = RetryPolicy::new(download.attempts, timeout, download.backoff);
        self.archive_retries.upload = RetryPolicy::new(upload.attempts, timeout, upload.backoff);
        self
    }
}
