// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Playlist grammar.
//!
//! Tracks are separated by a run of two or three colons and written as
//! `Artist · Title`. A run of four or more colons opens the footer, which
//! holds `<label> <url>` pairs and never yields tracks.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::episode::{ExtraLink, Track};

use super::links::{call_to_action_links, footer_links, merge_links};
use super::text::{PAIR_GLYPH, normalize};

static FOOTER_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":{4,}").unwrap());

static TRACK_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":{2,}").unwrap());

/// Removed from the playlist region before it is split into segments
static BOILERPLATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // call to action with its link
        r"(?i)(?:invita a popcasting a (?:un )?caf[ée]|apoya a popcasting|hazte mecenas|support the show)(?:(?:[^:]|:\s){0,60}?https?://(?:[^\s:]|:[^\s:])+)?",
        // promos for sister shows carrying a link, wherever they appear
        r"(?i)(?:flor de pasi[óo]n|my favourite|las felindras|revisionist history)(?:[^:]|:\s){0,80}?https?://(?:[^\s:]|:[^\s:])+",
        // obituary notes run to the next separator
        r"(?i)\bobituario\b(?:[^:]|:[^:])*",
        r"https?://(?:[^\s:]|:[^\s:])+",
        r"(?i)\bwww\.(?:[^\s:]|:[^\s:])+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

/// A segment that opens with a sister-show name is a promo, link or not. The
/// name only counts at the start of a segment, so titles such as
/// `John Coltrane · My Favourite Things` survive.
static SEGMENT_PROMO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?P<lead>^|:{2,})\s*(?:flor de pasi[óo]n|my favourite|las felindras|revisionist history)(?:[^:]|:[^:])*",
    )
    .unwrap()
});

static ENUMERATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[.)]\s*").unwrap());

static TRAILING_PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([^()]*\)\s*$").unwrap());

/// Spoken transitions that look like segments but are not tracks
static CONNECTIVES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:continuamos|seguimos|próxima|anterior|a continuación|y ahora)\b").unwrap()
});

const MIN_SEGMENT_CHARS: usize = 3;

/// Explicit `Artist · Title` pairs only need non-empty fields. Kept below the
/// two-character floor of guessed splits so `a · b :: c · d :: e` still reads
/// as the two tracks `a · b` and `c · d`.
const MIN_PAIR_FIELD_CHARS: usize = 1;

/// Guessed splits are held to a stricter floor
const MIN_GUESSED_FIELD_CHARS: usize = 2;

const GUESSABLE_SEGMENT_CHARS: std::ops::RangeInclusive<usize> = 4..=200;

/// Tracks and footer links recovered from one block of text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedText {
    pub tracks: Vec<Track>,
    pub links: Vec<ExtraLink>,
}

/// Parse a playlist out of free text. Never fails; empty input yields no tracks.
pub fn parse_playlist(text: &str) -> Vec<Track> {
    parse_playlist_text(text).tracks
}

/// Parse tracks and extra links in one pass over the same normalised text
pub fn parse_playlist_text(text: &str) -> ParsedText {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return ParsedText::default();
    }

    let (head, footer) = match FOOTER_RUN.find(&normalized) {
        Some(run) => (
            &normalized[..run.start()],
            Some((run.start(), &normalized[run.start()..])),
        ),
        None => (normalized.as_str(), None),
    };

    let mut found = Vec::new();
    if let Some((offset, footer)) = footer {
        found.extend(footer_links(footer, offset));
    }
    found.extend(call_to_action_links(&normalized));

    ParsedText {
        tracks: parse_tracks(head),
        links: merge_links(found),
    }
}

fn strip_boilerplate(text: &str) -> String {
    let without_promos = SEGMENT_PROMO.replace_all(text, "${lead} ").into_owned();
    BOILERPLATE
        .iter()
        .fold(without_promos, |acc, pattern| {
            pattern.replace_all(&acc, " ").into_owned()
        })
}

fn parse_tracks(region: &str) -> Vec<Track> {
    let cleaned = strip_boilerplate(region);
    let mut tracks: Vec<Track> = Vec::new();

    for segment in TRACK_SEPARATOR.split(&cleaned) {
        let segment = segment.trim();
        if segment.chars().count() < MIN_SEGMENT_CHARS {
            if !segment.is_empty() {
                debug!(segment, "dropped short playlist segment");
            }
            continue;
        }

        match split_segment(segment) {
            Some((artist, title)) => tracks.push(Track {
                position: tracks.len() as u32 + 1,
                artist,
                title,
            }),
            None => debug!(segment, "dropped playlist segment"),
        }
    }

    tracks
}

/// Split on the first pair separator; the title may contain more of them
fn split_segment(segment: &str) -> Option<(String, String)> {
    if let Some((artist, title)) = segment.split_once(PAIR_GLYPH) {
        return accept(clean_artist(artist), clean_field(title), MIN_PAIR_FIELD_CHARS);
    }

    let (artist, title) = guess_split(segment)?;
    accept(clean_artist(&artist), clean_field(&title), MIN_GUESSED_FIELD_CHARS)
}

/// First half of the words is the artist, the rest the title
fn guess_split(segment: &str) -> Option<(String, String)> {
    if !GUESSABLE_SEGMENT_CHARS.contains(&segment.chars().count()) {
        return None;
    }

    let words: Vec<&str> = segment.split_whitespace().collect();
    if words.len() < 2 {
        return None;
    }

    let half = words.len() / 2;
    Some((words[..half].join(" "), words[half..].join(" ")))
}

fn clean_artist(raw: &str) -> String {
    let trimmed = raw.trim();
    clean_field(&ENUMERATION.replace(trimmed, ""))
}

fn clean_field(raw: &str) -> String {
    let trimmed = raw.trim();
    let without_note = TRAILING_PARENTHETICAL.replace(trimmed, "");
    let kept = if without_note.trim().is_empty() {
        trimmed
    } else {
        &*without_note
    };

    kept.trim_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '–' | '—' | ',' | ';' | ':'))
        .to_string()
}

fn accept(artist: String, title: String, min_chars: usize) -> Option<(String, String)> {
    if is_track_field(&artist, min_chars) && is_track_field(&title, min_chars) {
        Some((artist, title))
    } else {
        None
    }
}

fn is_track_field(field: &str, min_chars: usize) -> bool {
    if field.chars().count() < min_chars.max(1) {
        return false;
    }
    // punctuation or bare numbers
    if !field.chars().any(char::is_alphabetic) {
        return false;
    }

    let lower = field.to_lowercase();
    if lower.contains("http") || lower.contains("www.") {
        return false;
    }

    !CONNECTIVES.is_match(field)
}
