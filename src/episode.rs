// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One playlist entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// 1-based, contiguous within a playlist
    pub position: u32,
    pub artist: String,
    pub title: String,
}

/// A supplementary link that is not part of the playlist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraLink {
    pub label: String,
    pub url: String,
}

/// A harvested episode, identified by its sequence number
///
/// The serialized form is the record handed to the persistence store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub sequence: u32,
    pub title: String,
    #[serde(rename = "date")]
    pub publish_date: Option<NaiveDate>,
    pub source_url: Option<String>,
    pub audio_url: Option<String>,
    pub file_size_bytes: Option<u64>,
    pub cover_image_url: Option<String>,
    pub duration_seconds: Option<u32>,
    pub playlist: Vec<Track>,
    pub extra_links: Vec<ExtraLink>,
    pub archived: bool,
}

impl Episode {
    /// Short label for logs and progress output
    pub fn label(&self) -> String {
        format!("#{} {}", self.sequence, self.title)
    }
}
