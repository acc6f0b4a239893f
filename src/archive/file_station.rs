// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synology File Station Web API backend.
//!
//! One session id (`sid`) is shared by all workers and renewed when the NAS
//! reports it expired.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::RemoteStoreError;

use super::remote::{PARTIAL_SUFFIX, RemoteFileStore, split_remote_path};

/// File Station reports a missing path with this code
const CODE_NOT_FOUND: i64 = 408;

/// Codes meaning the session id is no longer valid
const SESSION_CODES: [i64; 3] = [106, 107, 119];

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileInfo>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    code: Option<i64>,
    #[serde(default)]
    isdir: bool,
}

/// Client for a Synology NAS File Station
pub struct FileStationClient {
    client: reqwest::Client,
    base_url: Url,
    username: String,
    password: String,
    session: Mutex<Option<String>>,
}

impl FileStationClient {
    /// `base_url` is the DSM root, e.g. `http://nas.local:5000`
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, url::ParseError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            username: username.into(),
            password: password.into(),
            session: Mutex::new(None),
        })
    }

    /// DSM root for a host and port; the HTTPS port 5001 selects `https`
    pub fn base_url_for(host: &str, port: u16) -> String {
        let scheme = if port == 5001 { "https" } else { "http" };
        format!("{scheme}://{host}:{port}")
    }

    fn api_url(&self, cgi: &str, params: &[(&str, &str)]) -> Result<Url, RemoteStoreError> {
        let mut url = self
            .base_url
            .join(&format!("webapi/{cgi}"))
            .map_err(|e| RemoteStoreError::InvalidResponse {
                operation: "build request",
                reason: e.to_string(),
            })?;
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    /// Send a request that uses the session, forgetting the session id when
    /// the NAS rejects it
    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Option<T>, RemoteStoreError> {
        match request_data(operation, request).await {
            Err(RemoteStoreError::Api { code, .. }) if SESSION_CODES.contains(&code) => {
                warn!(code, "file station session expired");
                *self.session.lock().await = None;
                Err(RemoteStoreError::Api { operation, code })
            }
            other => other,
        }
    }

    /// Current session id, logging in when there is none
    async fn session_id(&self) -> Result<String, RemoteStoreError> {
        let mut session = self.session.lock().await;
        if let Some(sid) = session.as_ref() {
            return Ok(sid.clone());
        }

        let url = self.api_url(
            "auth.cgi",
            &[
                ("api", "SYNO.API.Auth"),
                ("version", "7"),
                ("method", "login"),
                ("account", &self.username),
                ("passwd", &self.password),
                ("session", "FileStation"),
                ("format", "sid"),
            ],
        )?;

        let data: Option<LoginData> = request_data("login", self.client.get(url)).await?;
        let sid = data
            .map(|d| d.sid)
            .ok_or(RemoteStoreError::NotLoggedIn)?;

        info!(host = self.base_url.host_str().unwrap_or_default(), "logged in to file station");
        *session = Some(sid.clone());
        Ok(sid)
    }

    /// End the session, if one is open. Best effort.
    pub async fn logout(&self) {
        let Some(sid) = self.session.lock().await.take() else {
            return;
        };

        let request = match self.api_url(
            "auth.cgi",
            &[
                ("api", "SYNO.API.Auth"),
                ("version", "1"),
                ("method", "logout"),
                ("session", "FileStation"),
                ("_sid", &sid),
            ],
        ) {
            Ok(url) => self.client.get(url),
            Err(_) => return,
        };

        if let Err(e) = request_data::<IgnoredAny>("logout", request).await {
            debug!(error = %e, "file station logout failed");
        }
    }

    async fn upload_partial(
        &self,
        sid: &str,
        local_path: &Path,
        directory: &str,
        partial_name: &str,
    ) -> Result<(), RemoteStoreError> {
        let file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| RemoteStoreError::Io {
                path: local_path.to_path_buf(),
                source: e,
            })?;
        let length = file
            .metadata()
            .await
            .map_err(|e| RemoteStoreError::Io {
                path: local_path.to_path_buf(),
                source: e,
            })?
            .len();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, length)
            .file_name(partial_name.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| RemoteStoreError::RequestFailed {
                operation: "upload",
                source: e,
            })?;

        // The file part must come last
        let form = Form::new()
            .text("path", directory.to_string())
            .text("create_parents", "true")
            .text("overwrite", "true")
            .part("file", part);

        let url = self.api_url(
            "entry.cgi",
            &[
                ("api", "SYNO.FileStation.Upload"),
                ("version", "2"),
                ("method", "upload"),
                ("_sid", sid),
            ],
        )?;

        self.send::<IgnoredAny>("upload", self.client.post(url).multipart(form))
            .await
            .map(|_| ())
    }

    async fn rename(&self, sid: &str, path: &str, new_name: &str) -> Result<(), RemoteStoreError> {
        let paths = json_list(path);
        let names = json_list(new_name);
        let url = self.api_url(
            "entry.cgi",
            &[
                ("api", "SYNO.FileStation.Rename"),
                ("version", "2"),
                ("method", "rename"),
                ("path", &paths),
                ("name", &names),
                ("_sid", sid),
            ],
        )?;

        self.send::<IgnoredAny>("rename", self.client.get(url))
            .await
            .map(|_| ())
    }

    async fn delete(&self, sid: &str, path: &str) -> Result<(), RemoteStoreError> {
        let paths = json_list(path);
        let url = self.api_url(
            "entry.cgi",
            &[
                ("api", "SYNO.FileStation.Delete"),
                ("version", "2"),
                ("method", "delete"),
                ("path", &paths),
                ("_sid", sid),
            ],
        )?;

        self.send::<IgnoredAny>("delete", self.client.get(url))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl RemoteFileStore for FileStationClient {
    async fn exists(&self, remote_path: &str) -> Result<bool, RemoteStoreError> {
        let sid = self.session_id().await?;
        let paths = json_list(remote_path);
        let url = self.api_url(
            "entry.cgi",
            &[
                ("api", "SYNO.FileStation.List"),
                ("version", "2"),
                ("method", "getinfo"),
                ("path", &paths),
                ("_sid", &sid),
            ],
        )?;

        match self.send::<FileList>("getinfo", self.client.get(url)).await {
            Ok(list) => Ok(list.is_some_and(|list| lists_existing_file(&list))),
            Err(RemoteStoreError::Api { code, .. }) if code == CODE_NOT_FOUND => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), RemoteStoreError> {
        let sid = self.session_id().await?;
        let (directory, name) = split_remote_path(remote_path);
        let partial_name = format!("{name}{PARTIAL_SUFFIX}");
        let partial_path = format!("{}/{partial_name}", directory.trim_end_matches('/'));

        debug!(remote_path, "uploading to file station");

        let result = match self
            .upload_partial(&sid, local_path, directory, &partial_name)
            .await
        {
            Ok(()) => self.rename(&sid, &partial_path, name).await,
            Err(e) => Err(e),
        };

        if result.is_err()
            && let Err(e) = self.delete(&sid, &partial_path).await
        {
            debug!(path = %partial_path, error = %e, "could not remove partial upload");
        }
        result
    }
}

async fn request_data<T: DeserializeOwned>(
    operation: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<Option<T>, RemoteStoreError> {
    let response = request
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| RemoteStoreError::RequestFailed {
            operation,
            source: e,
        })?;

    let body = response
        .bytes()
        .await
        .map_err(|e| RemoteStoreError::RequestFailed {
            operation,
            source: e,
        })?;

    into_data(operation, &body)
}

/// File Station takes path arguments as JSON arrays
fn json_list(value: &str) -> String {
    serde_json::json!([value]).to_string()
}

fn into_data<T: DeserializeOwned>(
    operation: &'static str,
    body: &[u8],
) -> Result<Option<T>, RemoteStoreError> {
    let response: ApiResponse<T> =
        serde_json::from_slice(body).map_err(|e| RemoteStoreError::InvalidResponse {
            operation,
            reason: e.to_string(),
        })?;

    if response.success {
        Ok(response.data)
    } else {
        Err(RemoteStoreError::Api {
            operation,
            code: response.error.map(|e| e.code).unwrap_or(-1),
        })
    }
}

fn lists_existing_file(list: &FileList) -> bool {
    !list.files.is_empty()
        && list
            .files
            .iter()
            .all(|file| file.code.is_none() && !file.isdir)
}
