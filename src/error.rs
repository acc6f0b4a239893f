// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when retrieving pages of raw entries
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to fetch {url}: {source}")]
    RequestFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Timed out after {timeout:?} fetching {url}")]
    TimedOut { url: String, timeout: Duration },

    #[error("Failed to decode response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("Failed to parse RSS feed: {0}")]
    Feed(#[from] rss::Error),

    #[error("Invalid source URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl FetchError {
    /// Whether repeating the request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::RequestFailed { .. } | FetchError::TimedOut { .. } => true,
            FetchError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            FetchError::InvalidResponse { .. } | FetchError::Feed(_) | FetchError::InvalidUrl(_) => {
                false
            }
        }
    }
}

/// Problems found while extracting metadata; recorded, never fatal
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Unrecognised publish date '{0}'")]
    InvalidDate(String),

    #[error("No audio URL found")]
    MissingAudioUrl,

    #[error("No canonical page URL found")]
    MissingSourceUrl,
}

/// Errors that can occur while downloading source audio into scratch space
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("HTTP request failed for {url}: {source}")]
    HttpFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to create file {path}: {source}")]
    FileCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream error while downloading {url}: {source}")]
    StreamFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Downloaded file from {url} is empty")]
    Empty { url: String },
}

impl DownloadError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpFailed { .. } | DownloadError::StreamFailed { .. } => true,
            DownloadError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            DownloadError::Empty { .. } => true,
            DownloadError::FileCreateFailed { .. } | DownloadError::FileWriteFailed { .. } => false,
        }
    }
}

/// Errors reported by a remote file store
#[derive(Error, Debug)]
pub enum RemoteStoreError {
    #[error("Request to file store failed during {operation}: {source}")]
    RequestFailed {
        operation: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("File store rejected {operation} (code {code})")]
    Api { operation: &'static str, code: i64 },

    #[error("Unexpected file store response during {operation}: {reason}")]
    InvalidResponse {
        operation: &'static str,
        reason: String,
    },

    #[error("File store has no active session")]
    NotLoggedIn,

    #[error("File store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RemoteStoreError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteStoreError::RequestFailed { .. } | RemoteStoreError::Io { .. } => true,
            // expired or dropped session; the next attempt logs in again
            RemoteStoreError::Api { code, .. } => matches!(code, 106 | 107 | 119),
            RemoteStoreError::NotLoggedIn => true,
            RemoteStoreError::InvalidResponse { .. } => false,
        }
    }
}

/// Errors that can occur while archiving an episode's audio
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Episode #{sequence} has no audio URL")]
    MissingAudioUrl { sequence: u32 },

    #[error("Failed to check archive for {remote_path}: {source}")]
    Lookup {
        remote_path: String,
        #[source]
        source: RemoteStoreError,
    },

    #[error("Failed to download source audio: {0}")]
    Download(#[from] DownloadError),

    #[error("Failed to upload {remote_path}: {source}")]
    Upload {
        remote_path: String,
        #[source]
        source: RemoteStoreError,
    },

    #[error("Failed to prepare scratch space in {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} timed out after {timeout:?}")]
    TimedOut {
        operation: &'static str,
        timeout: Duration,
    },
}

impl ArchiveError {
    /// Whether a later attempt (in this run or the next) may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ArchiveError::MissingAudioUrl { .. } => false,
            ArchiveError::Lookup { source, .. } | ArchiveError::Upload { source, .. } => {
                source.is_retryable()
            }
            ArchiveError::Download(e) => e.is_retryable(),
            ArchiveError::Scratch { .. } => false,
            ArchiveError::TimedOut { .. } => true,
        }
    }
}

/// Errors raised by the persistence store
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse record {path}: {source}")]
    InvalidRecord {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize record: {0}")]
    SerializeFailed(#[from] serde_json::Error),
}

/// Failure of one episode within a sync run
#[derive(Error, Debug)]
pub enum EpisodeError {
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Worker stopped unexpectedly: {0}")]
    Worker(String),
}

/// Errors that prevent a sync run from starting
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to read sync boundary: {0}")]
    Boundary(#[source] PersistenceError),
}
