// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::episode::Episode;
use crate::error::PersistenceError;

/// The persistence operations a sync run relies on.
///
/// Implementations must tolerate concurrent calls for distinct sequence
/// numbers.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Highest stored sequence number, 0 when the store is empty
    async fn highest_known_sequence(&self) -> Result<u32, PersistenceError>;

    /// Insert or replace the record for `episode.sequence`
    async fn upsert(&self, episode: &Episode) -> Result<(), PersistenceError>;

    async fn load(&self, sequence: u32) -> Result<Option<Episode>, PersistenceError>;

    async fn is_sequence_present(&self, sequence: u32) -> Result<bool, PersistenceError> {
        Ok(self.load(sequence).await?.is_some())
    }

    /// Whether a stored record says the audio is archived
    async fn is_archived(&self, sequence: u32) -> Result<bool, PersistenceError> {
        Ok(self.load(sequence).await?.is_some_and(|e| e.archived))
    }
}

const RECORD_PREFIX: &str = "episode_";
const RECORD_SUFFIX: &str = ".json";
const PARTIAL_SUFFIX: &str = ".partial";

/// One pretty-printed JSON record per episode: `episode_0486.json`
#[derive(Debug, Clone)]
pub struct JsonDirectoryStore {
    dir: PathBuf,
}

impl JsonDirectoryStore {
    /// Open (creating if needed) a record directory.
    ///
    /// Also removes `.partial` files left by interrupted writes.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PersistenceError::WriteFailed {
                path: dir.clone(),
                source: e,
            })?;

        let store = Self { dir };
        let cleaned = store.remove_partials().await?;
        if cleaned > 0 {
            info!(count = cleaned, "removed interrupted record writes");
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, sequence: u32) -> PathBuf {
        self.dir
            .join(format!("{RECORD_PREFIX}{sequence:04}{RECORD_SUFFIX}"))
    }

    async fn file_names(&self) -> Result<Vec<String>, PersistenceError> {
        let read_failed = |e| PersistenceError::ReadFailed {
            path: self.dir.clone(),
            source: e,
        };

        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(read_failed)?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(read_failed)? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    async fn remove_partials(&self) -> Result<usize, PersistenceError> {
        let mut removed = 0;
        for name in self.file_names().await? {
            if name.ends_with(PARTIAL_SUFFIX)
                && tokio::fs::remove_file(self.dir.join(&name)).await.is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Every stored sequence number, ascending
    pub async fn sequences(&self) -> Result<Vec<u32>, PersistenceError> {
        let mut sequences: Vec<u32> = self
            .file_names()
            .await?
            .iter()
            .filter_map(|name| sequence_from_file_name(name))
            .collect();
        sequences.sort_unstable();
        Ok(sequences)
    }
}

fn sequence_from_file_name(name: &str) -> Option<u32> {
    name.strip_prefix(RECORD_PREFIX)?
        .strip_suffix(RECORD_SUFFIX)?
        .parse()
        .ok()
}

#[async_trait]
impl PersistenceGateway for JsonDirectoryStore {
    async fn highest_known_sequence(&self) -> Result<u32, PersistenceError> {
        Ok(self.sequences().await?.last().copied().unwrap_or(0))
    }

    async fn upsert(&self, episode: &Episode) -> Result<(), PersistenceError> {
        let path = self.record_path(episode.sequence);
        let partial = path.with_extension(format!("json{PARTIAL_SUFFIX}"));
        let json = serde_json::to_vec_pretty(episode)?;

        tokio::fs::write(&partial, json)
            .await
            .map_err(|e| PersistenceError::WriteFailed {
                path: partial.clone(),
                source: e,
            })?;

        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| PersistenceError::WriteFailed {
                path: path.clone(),
                source: e,
            })?;

        debug!(sequence = episode.sequence, archived = episode.archived, "episode stored");
        Ok(())
    }

    async fn load(&self, sequence: u32) -> Result<Option<Episode>, PersistenceError> {
        let path = self.record_path(sequence);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistenceError::ReadFailed { path, source: e }),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| PersistenceError::InvalidRecord { path, source: e })
    }
}
