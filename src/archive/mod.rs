// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exactly-once archival of episode audio.
//!
//! The remote name depends only on the sequence number, so the existence
//! check before any transfer makes repeated runs idempotent.

mod download;
mod file_station;
mod remote;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::episode::Episode;
use crate::error::{ArchiveError, DownloadError, RemoteStoreError};
use crate::extract::probe_duration;
use crate::http::HttpClient;
use crate::progress::{NoopReporter, ProgressEvent, SharedProgressReporter};
use crate::retry::{AttemptError, RetryPolicy};

pub use download::{DownloadedAudio, download_audio};
pub use file_station::FileStationClient;
pub use remote::{LocalDirectoryStore, PARTIAL_SUFFIX, RemoteFileStore};

/// Where archived audio lives: `{prefix}/{show}_{sequence:04}.{extension}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub prefix: String,
    pub show: String,
    pub extension: String,
}

impl Default for ArchiveLayout {
    fn default() -> Self {
        Self {
            prefix: "/popcasting_marilyn/mp3".to_string(),
            show: "popcasting".to_string(),
            extension: "mp3".to_string(),
        }
    }
}

impl ArchiveLayout {
    pub fn file_name(&self, sequence: u32) -> String {
        format!("{}_{:04}.{}", self.show, sequence, self.extension)
    }

    /// Deterministic remote path; never derived from title or date
    pub fn remote_path(&self, sequence: u32) -> String {
        format!(
            "{}/{}",
            self.prefix.trim_end_matches('/'),
            self.file_name(sequence)
        )
    }
}

/// Result of a successful `archive` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// The audio was transferred during this call
    Archived {
        remote_path: String,
        bytes: u64,
        content_hash: String,
        duration_seconds: Option<u32>,
    },
    /// The archive already held the audio; nothing was transferred
    AlreadyArchived { remote_path: String },
}

impl ArchiveOutcome {
    pub fn remote_path(&self) -> &str {
        match self {
            ArchiveOutcome::Archived { remote_path, .. }
            | ArchiveOutcome::AlreadyArchived { remote_path } => remote_path,
        }
    }
}

/// Guarantees an episode's audio is durably archived
#[async_trait]
pub trait EpisodeArchiver: Send + Sync {
    async fn archive(&self, episode: &Episode) -> Result<ArchiveOutcome, ArchiveError>;
}

/// Retry settings for the three archive operations
#[derive(Debug, Clone, Copy)]
pub struct ArchiveRetries {
    pub lookup: RetryPolicy,
    pub download: RetryPolicy,
    pub upload: RetryPolicy,
}

impl Default for ArchiveRetries {
    fn default() -> Self {
        Self {
            lookup: RetryPolicy::default(),
            download: RetryPolicy::new(3, Duration::from_secs(900), Duration::from_secs(5)),
            upload: RetryPolicy::new(3, Duration::from_secs(900), Duration::from_secs(5)),
        }
    }
}

/// Downloads source audio into per-call scratch space and uploads it to a
/// [`RemoteFileStore`] under the layout's deterministic name
pub struct ArchiveStore<C: HttpClient, R: RemoteFileStore> {
    client: C,
    remote: R,
    layout: ArchiveLayout,
    scratch_root: PathBuf,
    retries: ArchiveRetries,
    reporter: SharedProgressReporter,
}

impl<C: HttpClient, R: RemoteFileStore> ArchiveStore<C, R> {
    pub fn new(client: C, remote: R, layout: ArchiveLayout, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            client,
            remote,
            layout,
            scratch_root: scratch_root.into(),
            retries: ArchiveRetries::default(),
            reporter: NoopReporter::shared(),
        }
    }

    pub fn with_retries(mut self, retries: ArchiveRetries) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_reporter(mut self, reporter: SharedProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn layout(&self) -> &ArchiveLayout {
        &self.layout
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    async fn is_archived(&self, remote_path: &str) -> Result<bool, ArchiveError> {
        self.retries
            .lookup
            .run("archive lookup", RemoteStoreError::is_retryable, || {
                self.remote.exists(remote_path)
            })
            .await
            .map_err(|e| match e {
                AttemptError::Failed(source) => ArchiveError::Lookup {
                    remote_path: remote_path.to_string(),
                    source,
                },
                AttemptError::TimedOut => ArchiveError::TimedOut {
                    operation: "archive lookup",
                    timeout: self.retries.lookup.timeout,
                },
            })
    }

    async fn download(&self, url: &str, target: &Path, sequence: u32) -> Result<DownloadedAudio, ArchiveError> {
        self.retries
            .download
            .run("audio download", DownloadError::is_retryable, || {
                download_audio(&self.client, url, target, sequence, &self.reporter)
            })
            .await
            .map_err(|e| match e {
                AttemptError::Failed(source) => ArchiveError::Download(source),
                AttemptError::TimedOut => ArchiveError::TimedOut {
                    operation: "audio download",
                    timeout: self.retries.download.timeout,
                },
            })
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), ArchiveError> {
        self.retries
            .upload
            .run("archive upload", RemoteStoreError::is_retryable, || {
                self.remote.upload(local, remote_path)
            })
            .await
            .map_err(|e| match e {
                AttemptError::Failed(source) => ArchiveError::Upload {
                    remote_path: remote_path.to_string(),
                    source,
                },
                AttemptError::TimedOut => ArchiveError::TimedOut {
                    operation: "archive upload",
                    timeout: self.retries.upload.timeout,
                },
            })
    }

    /// Scratch directory for one call; removed when dropped
    async fn scratch_dir(&self, sequence: u32) -> Result<tempfile::TempDir, ArchiveError> {
        tokio::fs::create_dir_all(&self.scratch_root)
            .await
            .map_err(|e| ArchiveError::Scratch {
                path: self.scratch_root.clone(),
                source: e,
            })?;

        tempfile::Builder::new()
            .prefix(&format!("{}_{:04}_", self.layout.show, sequence))
            .tempdir_in(&self.scratch_root)
            .map_err(|e| ArchiveError::Scratch {
                path: self.scratch_root.clone(),
                source: e,
            })
    }
}

#[async_trait]
impl<C: HttpClient, R: RemoteFileStore> EpisodeArchiver for ArchiveStore<C, R> {
    async fn archive(&self, episode: &Episode) -> Result<ArchiveOutcome, ArchiveError> {
        let sequence = episode.sequence;
        let remote_path = self.layout.remote_path(sequence);

        if self.is_archived(&remote_path).await? {
            debug!(sequence, remote_path = %remote_path, "already archived");
            return Ok(ArchiveOutcome::AlreadyArchived { remote_path });
        }

        let url = episode
            .audio_url
            .as_deref()
            .ok_or(ArchiveError::MissingAudioUrl { sequence })?;

        let scratch = self.scratch_dir(sequence).await?;
        let local = scratch.path().join(self.layout.file_name(sequence));

        let downloaded = self.download(url, &local, sequence).await?;

        let probe_path = local.clone();
        let duration_seconds = tokio::task::spawn_blocking(move || probe_duration(&probe_path))
            .await
            .ok()
            .flatten();

        self.reporter.report(ProgressEvent::Uploading {
            sequence,
            remote_path: remote_path.clone(),
        });
        self.upload(&local, &remote_path).await?;

        info!(
            sequence,
            remote_path = %remote_path,
            bytes = downloaded.bytes,
            hash = %downloaded.content_hash,
            "archived"
        );

        Ok(ArchiveOutcome::Archived {
            remote_path,
            bytes: downloaded.bytes,
            content_hash: downloaded.content_hash,
            duration_seconds,
        })
    }
}
