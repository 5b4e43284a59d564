//! Text normalization helpers.
//!
//! Dedup reusability checks, keyword heuristics and search text all compare
//! strings through these functions so that quoting and spacing differences
//! never change an outcome.

use std::collections::BTreeSet;

/// Quote characters removed during normalization.
const QUOTE_CHARS: &[char] = &['"', '\'', '`', '«', '»', '“', '”', '„', '‘', '’'];

/// Lowercase, drop quote characters, collapse runs of whitespace, trim.
pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;

    for ch in input.chars() {
        if QUOTE_CHARS.contains(&ch) {
            continue;
        }
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.extend(ch.to_lowercase());
    }

    out
}

/// Split into lowercase alphanumeric words (Unicode aware).
///
/// Tokens shorter than two characters are dropped.
pub fn tokenize(input: &str) -> Vec<String> {
    input
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_lowercase())
        .collect()
}

/// Token set of a string.
pub fn token_set(input: &str) -> BTreeSet<String> {
    tokenize(input).into_iter().collect()
}

/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => input[..idx].to_string(),
        None => input.to_string(),
    }
}

/// Normalize and dedup a tag list, keeping first-seen order.
pub fn normalize_tags<I, S>(tags: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();

    for tag in tags {
        let tag = normalize_text(tag.as_ref().trim_start_matches('#'));
        if tag.is_empty() || !seen.insert(tag.clone()) {
            continue;
        }
        out.push(tag);
        if out.len() >= limit {
            break;
        }
    }

    out
}

/// Build the denormalized search text stored on assets and listings.
pub fn build_search_text(
    title: Option<&str>,
    tags: &[String],
    description: Option<&str>,
    max_chars: usize,
) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    if let Some(title) = title {
        parts.push(normalize_text(title));
    }
    if !tags.is_empty() {
        parts.push(normalize_text(&tags.join(" ")));
    }
    if let Some(description) = description {
        parts.push(normalize_text(description));
    }

    let joined = parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if joined.is_empty() {
        None
    } else {
        Some(truncate_chars(&joined, max_chars))
    }
}
