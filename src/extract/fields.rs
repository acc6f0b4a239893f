// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-value extractors over an entry's title and body.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use url::Url;

use crate::error::ParseError;
use crate::source::Enclosure;

use super::links::{URL_TOKEN, clean_url};

static DATA_ORIG_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-orig-file\s*=\s*["']([^"']+)["']"#).unwrap());

static NUMBERED_PNG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)/\d+\.png$").unwrap());

/// Derives the sequence number from an entry title such as `Popcasting486`
#[derive(Debug, Clone)]
pub struct SequenceMatcher {
    pattern: Regex,
}

impl SequenceMatcher {
    pub fn new(show: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(&format!(r"(?i){}\s*#?(\d+)", regex::escape(show)))?;
        Ok(Self { pattern })
    }

    /// The first positive number that follows the show name
    pub fn sequence(&self, title: &str) -> Option<u32> {
        self.pattern
            .captures(title)
            .and_then(|caps| caps.get(1))
            .and_then(|digits| digits.as_str().parse::<u32>().ok())
            .filter(|sequence| *sequence > 0)
    }
}

/// Parse a publish timestamp and reduce it to the calendar date in its own offset
pub fn parse_publish_date(raw: &str) -> Result<NaiveDate, ParseError> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Ok(dt.date_naive());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.date_naive());
    }
    parse_relaxed_date(raw).ok_or_else(|| ParseError::InvalidDate(raw.to_string()))
}

fn parse_relaxed_date(raw: &str) -> Option<NaiveDate> {
    let zoned = [
        "%a, %d %b %Y %H:%M:%S %z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%d %H:%M:%S %z",
    ];
    for format in zoned {
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.date_naive());
        }
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Check if an extension is a known audio format
fn is_valid_audio_extension(ext: &str) -> bool {
    matches!(
        ext.to_lowercase().as_str(),
        "mp3" | "m4a" | "mp4" | "aac" | "ogg" | "opus" | "wav" | "flac"
    )
}

fn is_image_extension(ext: &str) -> bool {
    matches!(
        ext.to_lowercase().as_str(),
        "png" | "jpg" | "jpeg" | "gif" | "webp"
    )
}

/// Lower-cased extension of the last path segment, ignoring the query string
fn path_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let filename = parsed.path_segments()?.next_back()?;
    let (_, ext) = filename.rsplit_once('.')?;
    Some(ext.to_lowercase())
}

pub fn has_audio_extension(url: &str) -> bool {
    path_extension(url).is_some_and(|ext| is_valid_audio_extension(&ext))
}

fn has_image_extension(url: &str) -> bool {
    path_extension(url).is_some_and(|ext| is_image_extension(&ext))
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url).ok()?.host_str().map(str::to_lowercase)
}

/// All URL tokens in a markup body, entity-decoded, in order of appearance
fn body_urls(body: &str) -> Vec<String> {
    let decoded = html_escape::decode_html_entities(body);
    URL_TOKEN
        .find_iter(&decoded)
        .map(|m| clean_url(m.as_str()).to_string())
        .collect()
}

/// The entry's audio source.
///
/// An enclosure with an audio extension wins, then the first audio URL in the
/// body, then any enclosure at all.
pub fn audio_url(enclosure: Option<&Enclosure>, body: &str) -> Option<String> {
    if let Some(enclosure) = enclosure
        && has_audio_extension(&enclosure.url)
    {
        return Some(enclosure.url.clone());
    }

    body_urls(body)
        .into_iter()
        .find(|url| has_audio_extension(url))
        .or_else(|| enclosure.map(|e| e.url.clone()))
}

/// The canonical episode page: the entry link, else the first `.html` page in
/// the body hosted somewhere other than the audio
pub fn source_url(link: Option<&str>, body: &str, audio_url: Option<&str>) -> Option<String> {
    if let Some(link) = link.map(str::trim).filter(|l| !l.is_empty()) {
        return Some(link.to_string());
    }

    let audio_host = audio_url.and_then(host_of);
    body_urls(body).into_iter().find(|url| {
        path_extension(url).is_some_and(|ext| ext == "html" || ext == "htm")
            && host_of(url).is_some()
            && host_of(url) != audio_host
    })
}

/// The cover image: an uploaded original (`data-orig-file`) when present,
/// else any image in the body. A numbered `.png` is preferred in both cases.
pub fn cover_image_url(body: &str) -> Option<String> {
    let originals: Vec<String> = DATA_ORIG_FILE
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|m| html_escape::decode_html_entities(m.as_str()).into_owned())
        .filter(|url| url.contains("wp-content/uploads"))
        .collect();

    if let Some(url) = prefer_numbered_png(&originals) {
        return Some(url);
    }

    let images: Vec<String> = body_urls(body)
        .into_iter()
        .filter(|url| has_image_extension(url))
        .collect();
    prefer_numbered_png(&images)
}

fn prefer_numbered_png(candidates: &[String]) -> Option<String> {
    candidates
        .iter()
        .find(|url| {
            Url::parse(url)
                .map(|u| NUMBERED_PNG.is_match(u.path()))
                .unwrap_or(false)
        })
        .or_else(|| candidates.first())
        .cloned()
}
