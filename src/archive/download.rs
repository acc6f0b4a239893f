// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::DownloadError;
use crate::http::HttpClient;
use crate::progress::{ProgressEvent, SharedProgressReporter};

/// A completed download in scratch space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedAudio {
    pub bytes: u64,
    /// `sha256:<hex>` of the downloaded content
    pub content_hash: String,
}

/// Download source audio to `output_path`
///
/// Streams the response body to disk, hashing it on the way and reporting
/// progress through the reporter. An existing file at `output_path` is
/// truncated, so a retried attempt starts clean.
pub async fn download_audio<C: HttpClient>(
    client: &C,
    url: &str,
    output_path: &Path,
    sequence: u32,
    reporter: &SharedProgressReporter,
) -> Result<DownloadedAudio, DownloadError> {
    let response = client
        .get_stream(url)
        .await
        .map_err(|e| DownloadError::HttpFailed {
            url: url.to_string(),
            source: e,
        })?;

    if response.status >= 400 {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    reporter.report(ProgressEvent::DownloadStarting {
        sequence,
        content_length: response.content_length,
    });

    let mut file = File::create(output_path)
        .await
        .map_err(|e| DownloadError::FileCreateFailed {
            path: output_path.to_path_buf(),
            source: e,
        })?;

    let mut hasher = Sha256::new();
    let mut bytes_downloaded: u64 = 0;
    let mut stream = response.body;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| DownloadError::StreamFailed {
            url: url.to_string(),
            source: e,
        })?;

        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::FileWriteFailed {
                path: output_path.to_path_buf(),
                source: e,
            })?;

        hasher.update(&chunk);
        bytes_downloaded += chunk.len() as u64;

        reporter.report(ProgressEvent::DownloadProgress {
            sequence,
            bytes_downloaded,
            total_bytes: response.content_length,
        });
    }

    // Ensure all data is on disk before the upload reads it back
    file.sync_all()
        .await
        .map_err(|e| DownloadError::FileWriteFailed {
            path: output_path.to_path_buf(),
            source: e,
        })?;

    if bytes_downloaded == 0 {
        return Err(DownloadError::Empty {
            url: url.to_string(),
        });
    }

    Ok(DownloadedAudio {
        bytes: bytes_downloaded,
        content_hash: format!("sha256:{:x}", hasher.finalize()),
    })
}
