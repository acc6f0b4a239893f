// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turns raw source entries into [`Episode`] records.
//!
//! Extraction is deterministic and cannot fail: problems are collected as
//! [`ParseError`] warnings and the affected fields are left empty.

mod duration;
mod fields;
mod links;
mod playlist;
mod text;

use tracing::warn;

use crate::episode::Episode;
use crate::error::ParseError;
use crate::source::RawEntry;

pub use duration::probe_duration;
pub use fields::{
    SequenceMatcher, audio_url, cover_image_url, has_audio_extension, parse_publish_date,
    source_url,
};
pub use links::dedup_links;
pub use playlist::{ParsedText, parse_playlist, parse_playlist_text};
pub use text::{normalize, strip_markup};

/// An extracted episode plus everything that could not be recovered
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub episode: Episode,
    pub warnings: Vec<ParseError>,
}

/// Builds episodes from raw entries of one show
#[derive(Debug, Clone)]
pub struct MetadataExtractor {
    sequences: SequenceMatcher,
}

impl MetadataExtractor {
    /// `show` is the literal prefix that precedes the sequence number in titles
    pub fn new(show: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            sequences: SequenceMatcher::new(show)?,
        })
    }

    /// The sequence number encoded in the entry title, if any
    pub fn sequence_of(&self, raw: &RawEntry) -> Option<u32> {
        self.sequences.sequence(&raw.title)
    }

    /// Build the episode for `raw`, numbered `sequence`
    pub fn extract(&self, raw: &RawEntry, sequence: u32) -> Extraction {
        let mut warnings = Vec::new();

        let publish_date = raw
            .published
            .as_deref()
            .and_then(|published| match parse_publish_date(published) {
                Ok(date) => Some(date),
                Err(e) => {
                    warnings.push(e);
                    None
                }
            });

        let audio = audio_url(raw.enclosure.as_ref(), &raw.body);
        if audio.is_none() {
            warnings.push(ParseError::MissingAudioUrl);
        }

        let source = source_url(raw.link.as_deref(), &raw.body, audio.as_deref());
        if source.is_none() {
            warnings.push(ParseError::MissingSourceUrl);
        }

        let parsed = parse_playlist_text(&strip_markup(&raw.body));

        for warning in &warnings {
            warn!(sequence, warning = %warning, "incomplete episode metadata");
        }

        let episode = Episode {
            sequence,
            title: normalize(&raw.title),
            publish_date,
            source_url: source,
            audio_url: audio,
            file_size_bytes: raw.enclosure.as_ref().and_then(|e| e.length),
            cover_image_url: cover_image_url(&raw.body),
            duration_seconds: None,
            playlist: parsed.tracks,
            extra_links: parsed.links,
            archived: false,
        };

        Extraction { episode, warnings }
    }
}
