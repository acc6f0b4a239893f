// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::RemoteStoreError;

/// Suffix of objects that are still being transferred
pub const PARTIAL_SUFFIX: &str = ".partial";

/// The two operations the archive needs from long-term storage
#[async_trait]
pub trait RemoteFileStore: Send + Sync {
    /// Whether a complete object exists at `remote_path`.
    ///
    /// Must be a direct lookup of that one path, never a directory listing.
    async fn exists(&self, remote_path: &str) -> Result<bool, RemoteStoreError>;

    /// Store `local_path` at `remote_path`, all or nothing: on failure no
    /// object is left at `remote_path`.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteStoreError>;
}

#[async_trait]
impl<T: RemoteFileStore + ?Sized> RemoteFileStore for Arc<T> {
    async fn exists(&self, remote_path: &str) -> Result<bool, RemoteStoreError> {
        (**self).exists(remote_path).await
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteStoreError> {
        (**self).upload(local_path, remote_path).await
    }
}

/// Split `/a/b/name.mp3` into (`/a/b`, `name.mp3`)
pub(crate) fn split_remote_path(remote_path: &str) -> (&str, &str) {
    match remote_path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => ("/", remote_path),
    }
}

/// A directory on a locally mounted filesystem (NAS share, external disk)
#[derive(Debug, Clone)]
pub struct LocalDirectoryStore {
    root: PathBuf,
}

impl LocalDirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map an absolute archive path below the store root
    pub fn resolve(&self, remote_path: &str) -> PathBuf {
        self.root.join(remote_path.trim_start_matches('/'))
    }

    async fn copy_then_rename(&self, local_path: &Path, target: &Path, partial: &Path) -> Result<(), RemoteStoreError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteStoreError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        tokio::fs::copy(local_path, partial)
            .await
            .map_err(|e| RemoteStoreError::Io {
                path: partial.to_path_buf(),
                source: e,
            })?;

        tokio::fs::rename(partial, target)
            .await
            .map_err(|e| RemoteStoreError::Io {
                path: target.to_path_buf(),
                source: e,
            })
    }
}

#[async_trait]
impl RemoteFileStore for LocalDirectoryStore {
    async fn exists(&self, remote_path: &str) -> Result<bool, RemoteStoreError> {
        let path = self.resolve(remote_path);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(RemoteStoreError::Io { path, source: e }),
        }
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteStoreError> {
        let target = self.resolve(remote_path);
        let mut partial_name = target.clone().into_os_string();
        partial_name.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial_name);

        debug!(target = %target.display(), "copying into archive directory");

        let result = self.copy_then_rename(local_path, &target, &partial).await;
        if result.is_err()
            && let Err(e) = tokio::fs::remove_file(&partial).await
            && e.kind() != ErrorKind::NotFound
        {
            warn!(path = %partial.display(), error = %e, "failed to remove partial upload");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn split_remote_path_handles_root_and_nested() {
        assert_eq!(
            split_remote_path("/popcasting_marilyn/mp3/popcasting_0486.mp3"),
            ("/popcasting_marilyn/mp3", "popcasting_0486.mp3")
        );
        assert_eq!(split_remote_path("/a.mp3"), ("/", "a.mp3"));
        assert_eq!(split_remote_path("a.mp3"), ("/", "a.mp3"));
    }

    #[tokio::test]
    async fn upload_then_exists() {
        let archive = tempdir().unwrap();
        let scratch = tempdir().unwrap();
        let local = scratch.path().join("audio.mp3");
        std::fs::write(&local, b"audio").unwrap();

        let store = LocalDirectoryStore::new(archive.path());
        let remote = "/popcasting_marilyn/mp3/popcasting_0001.mp3";

        assert!(!store.exists(remote).await.unwrap());
        store.upload(&local, remote).await.unwrap();
        assert!(store.exists(remote).await.unwrap());

        let stored = archive.path().join("popcasting_marilyn/mp3/popcasting_0001.mp3");
        assert_eq!(std::fs::read(stored).unwrap(), b"audio");
        assert!(
            !archive
                .path()
                .join("popcasting_marilyn/mp3/popcasting_0001.mp3.partial")
                .exists()
        );
    }

    #[tokio::test]
    async fn leftover_partial_does_not_count_as_present() {
        let archive = tempdir().unwrap();
        let dir = archive.path().join("mp3");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("popcasting_0002.mp3.partial"), b"half").unwrap();

        let store = LocalDirectoryStore::new(archive.path());

        assert!(!store.exists("/mp3/popcasting_0002.mp3").await.unwrap());
    }

    #[tokio::test]
    async fn failed_upload_leaves_nothing_behind() {
        let archive = tempdir().unwrap();
        let store = LocalDirectoryStore::new(archive.path());
        let missing_source = archive.path().join("does-not-exist.mp3");

        let result = store.upload(&missing_source, "/mp3/popcasting_0003.mp3").await;

        assert!(matches!(result, Err(RemoteStoreError::Io { .. })));
        assert!(!store.exists("/mp3/popcasting_0003.mp3").await.unwrap());
        assert!(!archive.path().join("mp3/popcasting_0003.mp3.partial").exists());
    }

    #[tokio::test]
    async fn directory_is_not_a_file() {
        let archive = tempdir().unwrap();
        std::fs::create_dir_all(archive.path().join("mp3/popcasting_0004.mp3")).unwrap();

        let store = LocalDirectoryStore::new(archive.path());

        assert!(!store.exists("/mp3/popcasting_0004.mp3").await.unwrap());
    }
}
