//! Utility functions for the Hearth HTTP engine.
//!
//! This includes
//! - commonly used [`chars`],
//! - the sans-IO HTTP/1 [`parse`]rs (request line, headers, targets, queries, multipart metadata),
//! - [`hardcoded_error_body`] to get a hard-coded error page,
//! - helpers for managing a [`HeaderMap`].
#![deny(
    unreachable_pub,
    missing_debug_implementations,
    missing_docs,
    clippy::pedantic
)]
#![allow(clippy::missing_panics_doc, clippy::module_name_repetitions)]

pub mod parse;
pub mod prelude;
use prelude::*;

pub use parse::{list_header, ValueQualitySet};

/// Common characters expressed as a single byte each, according to UTF-8.
pub mod chars {
    /// Line feed
    pub const LF: u8 = 10;
    /// Carrage return
    pub const CR: u8 = 13;
    /// ` `
    pub const SPACE: u8 = 32;
    /// `:`
    pub const COLON: u8 = 58;
    /// `;`
    pub const SEMICOLON: u8 = 59;
    /// `~`
    pub const TILDE: u8 = 126;
}

/// Get a hardcoded error page.
///
/// Used when no renderer is available, for example when a TLS handshake
/// fails and the client gets a plain-text HTTP answer.
#[must_use]
pub fn hardcoded_error_body(code: StatusCode, message: Option<&[u8]>) -> Bytes {
    let mut body = BytesMut::with_capacity(200);
    let reason = code.canonical_reason();

    body.extend(b"<html><head><title>");
    body.extend(code.as_str().as_bytes());
    body.extend(b" ");
    if let Some(reason) = reason {
        body.extend(reason.as_bytes());
    }

    body.extend(b"</title></head><body><center><h1>".iter());
    body.extend(code.as_str().as_bytes());
    body.extend(b" ");
    if let Some(reason) = reason {
        body.extend(reason.as_bytes());
    }
    body.extend(b"</h1><hr>".iter());

    if let Some(message) = message {
        body.extend(b"<p>");
        body.extend(message);
        body.extend(b"</p>");
    }

    body.extend(b"</center></body></html>".iter());

    body.freeze()
}

/// Replaces the header `name` with `new` in `headers`.
///
/// Removes all other occurrences of `name`.
#[inline]
pub fn replace_header<K: header::IntoHeaderName + Copy>(
    headers: &mut HeaderMap,
    name: K,
    new: HeaderValue,
) {
    match headers.entry(name) {
        header::Entry::Vacant(slot) => {
            slot.insert(new);
        }
        header::Entry::Occupied(slot) => {
            slot.remove_entry_mult();
            headers.insert(name, new);
        }
    }
}
/// Replaces header `name` with `new` (a &'static str) in `headers`.
///
/// See [`replace_header`] for more info.
#[inline]
pub fn replace_header_static<K: header::IntoHeaderName + Copy>(
    headers: &mut HeaderMap,
    name: K,
    new: &'static str,
) {
    replace_header(headers, name, HeaderValue::from_static(new));
}
/// Checks the equality of value of `name` in `headers` and `value`.
/// Value does not need to be all lowercase; the equality operation ignores the cases.
pub fn header_eq(headers: &HeaderMap, name: impl header::AsHeaderName, value: &str) -> bool {
    let header_value = headers
        .get(name)
        .map(HeaderValue::to_str)
        .and_then(Result::ok);
    header_value.map_or(false, |s| s.eq_ignore_ascii_case(value))
}

/// Checks if the comma separated header `name` contains the token `value`, ignoring case.
///
/// Useful for `connection: keep-alive, Upgrade` and similar list headers.
pub fn header_contains(headers: &HeaderMap, name: impl header::AsHeaderName, value: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|header| header.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case(value))
}

/// Gets the `content-length` of `headers`.
///
/// Returns [`None`] if the header is absent and [`parse::Error::InvalidLength`]
/// if it isn't a plain number.
///
/// # Errors
///
/// See above.
pub fn content_length(headers: &HeaderMap) -> Result<Option<usize>, parse::Error> {
    match headers.get("content-length") {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .ok()
            .map(str::trim)
            .and_then(|len| len.parse().ok())
            .map(Some)
            .ok_or(parse::Error::InvalidLength),
    }
}

/// Sets the `content-length` of `headers` to `len`.
///
/// See [`replace_header`] for details.
#[inline]
pub fn set_content_length(headers: &mut HeaderMap, len: usize) {
    replace_header(headers, "content-length", HeaderValue::from(len));
}

/// Escapes `text` for use inside HTML or XML text and attribute values.
#[must_use]
pub fn escape_markup(text: &str) -> std::borrow::Cow<'_, str> {
    if !text.contains(|c| matches!(c, '<' | '>' | '&' | '"' | '\'')) {
        return std::borrow::Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    std::borrow::Cow::Owned(escaped)
}
