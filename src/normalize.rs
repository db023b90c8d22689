//! Text canonicalization used to derive every lookup key.
//!
//! All functions are pure and infallible: malformed entities are kept
//! verbatim and empty input yields an empty string.

use std::borrow::Cow;

use lazy_static::lazy_static;
use quick_xml::escape::resolve_html5_entity;
use regex::{Captures, Regex};

// Legacy description markers, stripped once after unescaping.
const DESC_MARKERS: [&str; 2] = ["&desc;", "&amp;desc;"];

lazy_static! {
    static ref ENTITY_REGEX: Regex =
        Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{0,31});").unwrap();
}

/// Canonical form of `text`: HTML entities unescaped, one legacy `&desc;`
/// prefix removed, whitespace runs collapsed to one space, ends trimmed.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let unescaped = unescape_entities(text);
    let stripped = strip_desc_marker(unescaped.trim_start());
    collapse_whitespace(stripped)
}

/// [`normalize`] followed by lowercasing.
pub fn normalize_for_matching(text: &str) -> String {
    normalize(text).to_lowercase()
}

/// [`normalize`] with every whitespace character removed.
///
/// Only used as a last-resort equality key when whitespace drifted between
/// the correction and the corpus.
pub fn normalize_no_space(text: &str) -> String {
    normalize(text)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

/// [`normalize`] for optional input; `None` yields an empty string.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

fn unescape_entities(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    ENTITY_REGEX.replace_all(text, |caps: &Captures| {
        let body = &caps[1];
        resolve_entity(body).unwrap_or_else(|| caps[0].to_string())
    })
}

fn resolve_entity(body: &str) -> Option<String> {
    if let Some(numeric) = body.strip_prefix('#') {
        let code = match numeric.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => numeric.parse::<u32>().ok()?,
        };
        return char::from_u32(code).map(String::from);
    }
    resolve_html5_entity(body).map(str::to_string)
}

fn strip_desc_marker(text: &str) -> &str {
    DESC_MARKERS
        .iter()
        .find_map(|marker| text.strip_prefix(marker))
        .unwrap_or(text)
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}
