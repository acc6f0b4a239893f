// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Text clean-up shared by the extractors.

use std::sync::LazyLock;

use regex::Regex;

/// Canonical artist/title separator
pub const PAIR_GLYPH: char = '·';

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());

static BLOCK_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<\s*(br|/p|/li|/div|/h[1-6])\b[^>]*>").unwrap());

/// Look-alikes folded onto the artist/title separator. Mojibake first so its
/// stray `Â` goes with it.
const PAIR_LOOKALIKES: &[&str] = &["Â·", "•", "∙", "⋅", "‧", "･", "・", "ꞏ"];

/// Look-alikes folded onto the track separator glyph
const TRACK_LOOKALIKES: &[(&str, &str)] = &[("∷", "::"), ("：", ":"), ("∶", ":"), ("꞉", ":")];

/// Remove markup, decoding entities. Block-level tags become spaces so words
/// on adjacent lines do not run together.
pub fn strip_markup(markup: &str) -> String {
    let spaced = BLOCK_TAG.replace_all(markup, " ");
    let without_tags = TAG.replace_all(&spaced, "");
    html_escape::decode_html_entities(&without_tags).into_owned()
}

/// Collapse whitespace runs (including NBSP) into single spaces and drop
/// control characters.
pub fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut pending_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else if c.is_control() {
            continue;
        } else {
            if pending_space && !result.is_empty() {
                result.push(' ');
            }
            pending_space = false;
            result.push(c);
        }
    }

    result
}

/// Map known look-alikes of both structural glyphs onto their canonical form
pub fn fold_glyphs(text: &str) -> String {
    let mut folded = text.to_string();
    for lookalike in PAIR_LOOKALIKES {
        if folded.contains(lookalike) {
            folded = folded.replace(lookalike, "·");
        }
    }
    for (lookalike, canonical) in TRACK_LOOKALIKES {
        if folded.contains(lookalike) {
            folded = folded.replace(lookalike, canonical);
        }
    }
    folded
}

/// Full normalisation applied before playlist parsing
pub fn normalize(text: &str) -> String {
    let decoded = html_escape::decode_html_entities(text);
    collapse_whitespace(&fold_glyphs(&decoded))
}
