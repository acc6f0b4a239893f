// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::episode::ExtraLink;

/// A URL runs until whitespace or a double colon; single colons (ports) are kept
pub(crate) static URL_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://(?:[^\s<>"'·:]|:[^\s<>"'·:])+"#).unwrap()
});

static SEPARATOR_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":{2,}").unwrap());

static CALL_TO_ACTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)invita a popcasting a (?:un )?caf[ée]|apoya a popcasting|hazte mecenas|support the show",
    )
    .unwrap()
});

/// Text allowed between a call-to-action phrase and its URL
const MAX_CALL_TO_ACTION_GAP: usize = 60;

/// A link together with its byte offset in the normalised text
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FoundLink {
    pub offset: usize,
    pub link: ExtraLink,
}

/// Strip trailing punctuation that is almost never part of a URL
pub fn clean_url(token: &str) -> &str {
    token.trim_end_matches(['.', ',', ';', ':', ')', ']', '!', '?', '\'', '"'])
}

fn clean_label(text: &str) -> &str {
    text.trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, ':' | ';' | '·' | '|' | '-' | '–' | '—' | '(' | ')')
    })
}

fn host_label(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_else(|| url.to_string())
}

/// Parse a footer segment as repeated `<label> <url>` pairs.
///
/// `base` is the footer's offset in the surrounding text.
pub(crate) fn footer_links(footer: &str, base: usize) -> Vec<FoundLink> {
    let mut found = Vec::new();
    let mut chunk_start = 0;

    let mut boundaries: Vec<(usize, usize)> = SEPARATOR_RUN
        .find_iter(footer)
        .map(|m| (m.start(), m.end()))
        .collect();
    boundaries.push((footer.len(), footer.len()));

    for (run_start, run_end) in boundaries {
        let chunk = &footer[chunk_start..run_start];
        let mut label_start = 0;

        for url_match in URL_TOKEN.find_iter(chunk) {
            let url = clean_url(url_match.as_str());
            let raw_label = &chunk[label_start..url_match.start()];
            let label = clean_label(raw_label);
            let offset = if label.is_empty() {
                url_match.start()
            } else {
                label_start + (raw_label.len() - raw_label.trim_start().len())
            };

            found.push(FoundLink {
                offset: base + chunk_start + offset,
                link: ExtraLink {
                    label: if label.is_empty() {
                        host_label(url)
                    } else {
                        label.to_string()
                    },
                    url: url.to_string(),
                },
            });
            label_start = url_match.end();
        }

        chunk_start = run_end;
    }

    found
}

/// Detect call-to-action phrases followed closely by a URL, anywhere in the text
pub(crate) fn call_to_action_links(text: &str) -> Vec<FoundLink> {
    CALL_TO_ACTION
        .find_iter(text)
        .filter_map(|phrase| {
            let rest = &text[phrase.end()..];
            let url_match = URL_TOKEN.find(rest)?;
            let gap = &rest[..url_match.start()];
            if gap.len() > MAX_CALL_TO_ACTION_GAP || gap.contains("::") {
                return None;
            }
            Some(FoundLink {
                offset: phrase.start(),
                link: ExtraLink {
                    label: phrase.as_str().to_string(),
                    url: clean_url(url_match.as_str()).to_string(),
                },
            })
        })
        .collect()
}

/// Deduplicate by URL (case-sensitive, ignoring a trailing slash), keeping
/// the first occurrence and encounter order.
pub fn dedup_links(links: impl IntoIterator<Item = ExtraLink>) -> Vec<ExtraLink> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|link| seen.insert(link.url.trim_end_matches('/').to_string()))
        .collect()
}

/// Order links by position in the text, then deduplicate
pub(crate) fn merge_links(mut found: Vec<FoundLink>) -> Vec<ExtraLink> {
    found.sort_by_key(|f| f.offset);
    dedup_links(found.into_iter().map(|f| f.link))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(label: &str, url: &str) -> ExtraLink {
        ExtraLink {
            label: label.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn footer_pairs_are_split_on_urls() {
        let footer = ":::::: promo https://x.test ::::::";
        let found = footer_links(footer, 0);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].link, link("promo", "https://x.test"));
        assert_eq!(found[0].offset, 7);
    }

    #[test]
    fn footer_with_several_pairs_keeps_order() {
        let footer = ":::::: Flor de pasión https://flordepasion.example/ep1. \
                      Las Felindras: https://felindras.example ::::::";
        let links: Vec<ExtraLink> = footer_links(footer, 100).into_iter().map(|f| f.link).collect();

        assert_eq!(
            links,
            vec![
                link("Flor de pasión", "https://flordepasion.example/ep1"),
                link("Las Felindras", "https://felindras.example"),
            ]
        );
    }

    #[test]
    fn unlabelled_footer_url_uses_host() {
        let found = footer_links(":::::: https://www.youtube.com/watch?v=abc ::::::", 0);
        assert_eq!(found[0].link.label, "youtube.com");
    }

    #[test]
    fn call_to_action_needs_a_nearby_url() {
        let text = "Invita a Popcasting a un café: https://ko-fi.com/popcasting y gracias";
        let found = call_to_action_links(text);

        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].link,
            link("Invita a Popcasting a un café", "https://ko-fi.com/popcasting")
        );

        let far = format!("hazte mecenas {} https://example.com", "x".repeat(80));
        assert!(call_to_action_links(&far).is_empty());
        assert!(call_to_action_links("apoya a popcasting :: https://example.com").is_empty());
    }

    #[test]
    fn dedup_is_by_url_not_label() {
        let links = dedup_links(vec![
            link("first", "https://x.test/"),
            link("second", "https://y.test"),
            link("again", "https://x.test"),
        ]);

        assert_eq!(
            links,
            vec![link("first", "https://x.test/"), link("second", "https://y.test")]
        );
    }

    #[test]
    fn dedup_is_case_sensitive() {
        let links = dedup_links(vec![link("a", "https://x.test/A"), link("b", "https://x.test/a")]);
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn clean_url_strips_trailing_punctuation() {
        assert_eq!(clean_url("https://x.test/path)."), "https://x.test/path");
        assert_eq!(clean_url("https://x.test/?q=1"), "https://x.test/?q=1");
    }
}
