//! General parsing of HTTP/1 messages.
//!
//! These functions never touch a stream; they work on single lines and header
//! values. The reading (and the decision of where a line ends) is done by
//! `hearth_async`, which calls into here.
//!
//! The [`target`], [`query`] and [`boundary`] parsers are used to build a request.

use crate::prelude::*;
use percent_encoding::percent_decode_str;
use std::borrow::Cow;

/// A general error from parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The stream ended before the message was complete.
    UnexpectedEnd,
    /// A single line exceeds the maximum length.
    LineTooLong,
    /// The header block contains too many lines.
    TooManyHeaders,
    /// The request line does not consist of exactly three tokens,
    /// or contains bytes which aren't valid UTF-8.
    ///
    /// Often means the request isn't what we expect;
    /// maybe it's transmitted over HTTPS.
    Syntax,
    /// The [`Method`] isn't one of the supported ones.
    InvalidMethod,
    /// The [`Version`] isn't `HTTP/1.0` nor `HTTP/1.1`.
    InvalidVersion,
    /// No path was supplied in the request line.
    NoPath,
    /// A header line doesn't contain a colon.
    MissingColon,
    /// There are illegal bytes in a [`HeaderName`].
    IllegalName,
    /// There are illegal bytes in a [`HeaderValue`].
    IllegalValue,
    /// The `content-length` isn't a positive integer.
    InvalidLength,
    /// A chunk size line of a chunked body isn't hexadecimal.
    InvalidChunkSize,
    /// A chunk wasn't followed by a line terminator.
    TruncatedChunk,
    /// The multipart boundary is missing, empty or contains non-printable bytes.
    InvalidBoundary,
    /// The multipart body doesn't follow the structure set by the boundary.
    InvalidMultipart,
    /// The body is larger than allowed.
    BodyTooLarge,
    /// The `content-type` of the body isn't one we can decode.
    UnsupportedContent,
    /// The `transfer-encoding` isn't `chunked`.
    UnsupportedEncoding,
}
impl Error {
    /// Gets a string representation of [`Error`].
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnexpectedEnd => "stream is exhausted",
            Self::LineTooLong => "line is too long",
            Self::TooManyHeaders => "too many header lines",
            Self::Syntax => {
                "invalid syntax of request line. The input might unexpectedly \
                be encrypted (HTTPS) or compressed (HTTP/2)"
            }
            Self::InvalidMethod => "method is not supported",
            Self::InvalidVersion => "protocol version is not supported",
            Self::NoPath => "no path was supplied in the request",
            Self::MissingColon => "header line without a colon",
            Self::IllegalName => "header name invalid",
            Self::IllegalValue => "header value invalid",
            Self::InvalidLength => "content-length is invalid",
            Self::InvalidChunkSize => "chunk size is not hexadecimal",
            Self::TruncatedChunk => "chunk is not terminated by a line break",
            Self::InvalidBoundary => "multipart boundary is invalid",
            Self::InvalidMultipart => "multipart body is malformed",
            Self::BodyTooLarge => "body exceeds the maximum length",
            Self::UnsupportedContent => "content-type is not supported",
            Self::UnsupportedEncoding => "transfer-encoding is not supported",
        }
    }
    /// If this error leaves the reader at an unknown position in the byte stream.
    ///
    /// All errors do, except [`Self::UnsupportedContent`], which is raised for a body
    /// refused after it has been read in full.
    #[must_use]
    pub fn breaks_framing(&self) -> bool {
        !matches!(self, Self::UnsupportedContent)
    }
}
impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl std::error::Error for Error {}
impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::UnexpectedEnd => io::Error::new(io::ErrorKind::UnexpectedEof, err.as_str()),
            _ => io::Error::new(io::ErrorKind::InvalidData, err.as_str()),
        }
    }
}

/// Trims ASCII whitespace on both sides of `bytes`.
#[must_use]
pub fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |pos| pos + 1);
    &bytes[start..end.max(start)]
}

/// Parses the bytes of a method. Only the methods Hearth serves are accepted.
#[must_use]
pub fn method(bytes: &[u8]) -> Option<Method> {
    Some(match bytes {
        b"GET" => Method::GET,
        b"POST" => Method::POST,
        b"PUT" => Method::PUT,
        b"DELETE" => Method::DELETE,
        b"OPTIONS" => Method::OPTIONS,
        _ => return None,
    })
}
/// Parses the bytes of a protocol token.
#[must_use]
pub fn version(bytes: &[u8]) -> Option<Version> {
    match bytes {
        b"HTTP/1.0" => Some(Version::HTTP_10),
        b"HTTP/1.1" => Some(Version::HTTP_11),
        _ => None,
    }
}
/// The protocol token of `version`, as written on the wire.
#[must_use]
pub fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_10 => "HTTP/1.0",
        _ => "HTTP/1.1",
    }
}

/// The three parts of a request line.
#[derive(Debug, PartialEq, Eq)]
pub struct RequestLine<'a> {
    /// The requested method.
    pub method: Method,
    /// The raw request target, with path and query.
    pub target: &'a str,
    /// The protocol token.
    pub version: Version,
}
/// Parses a request line (without line terminator).
///
/// The line must split into exactly three whitespace-separated tokens.
/// An absolute-form target (`http://host/path`) is reduced to its path.
///
/// # Errors
///
/// Returns [`Error::Syntax`] if the token count is wrong,
/// [`Error::InvalidMethod`] and [`Error::InvalidVersion`] for unknown tokens
/// and [`Error::NoPath`] if the target doesn't contain a path.
pub fn request_line(line: &[u8]) -> Result<RequestLine<'_>, Error> {
    let mut tokens = line
        .split(u8::is_ascii_whitespace)
        .filter(|token| !token.is_empty());
    let (Some(method_token), Some(target), Some(version_token), None) =
        (tokens.next(), tokens.next(), tokens.next(), tokens.next())
    else {
        return Err(Error::Syntax);
    };
    let method = method(method_token).ok_or(Error::InvalidMethod)?;
    let version = version(version_token).ok_or(Error::InvalidVersion)?;
    let mut target = str::from_utf8(target).map_err(|_| Error::Syntax)?;

    if let Some((_scheme, rest)) = target.split_once("://") {
        target = rest.find('/').map_or("/", |start| &rest[start..]);
    }
    if !target.starts_with('/') && !(method == Method::OPTIONS && target == "*") {
        return Err(Error::NoPath);
    }
    Ok(RequestLine {
        method,
        target,
        version,
    })
}

/// Parses a single header line (without line terminator) into it's name and value.
///
/// The name is trimmed and case-folded, the value trimmed.
///
/// # Errors
///
/// [`Error::MissingColon`] if there's no colon in `line`, and
/// [`Error::IllegalName`] and [`Error::IllegalValue`] if the parts contain illegal bytes.
pub fn header_line(line: &[u8]) -> Result<(HeaderName, HeaderValue), Error> {
    let colon = line
        .iter()
        .position(|byte| *byte == chars::COLON)
        .ok_or(Error::MissingColon)?;
    let name = HeaderName::from_bytes(trim(&line[..colon])).map_err(|_| Error::IllegalName)?;
    let value = HeaderValue::from_bytes(trim(&line[colon + 1..])).map_err(|_| Error::IllegalValue)?;
    Ok((name, value))
}

/// Percent-decodes `text`. Invalid UTF-8 is replaced.
#[must_use]
pub fn percent_decode(text: &str) -> Cow<'_, str> {
    percent_decode_str(text).decode_utf8_lossy()
}

/// Splits a request target on the first `?` into the path and the query.
#[must_use]
pub fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// The maximum length of a extension, including the leading dot.
pub const MAX_EXTENSION_LEN: usize = 10;

/// A decoded request path.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct DecodedPath {
    /// The path, always starting with `/`, without repeated or trailing slashes.
    pub path: String,
    /// The extension of the last segment, including the dot. E.g. `.json`.
    pub extension: Option<String>,
}
/// Decodes the path part of a target.
///
/// Each segment is percent-decoded, repeated `/` are collapsed and the trailing `/` is removed.
/// If the last segment has a `.` within it's last [`MAX_EXTENSION_LEN`] characters,
/// the extension is split off.
#[must_use]
pub fn path(raw: &str) -> DecodedPath {
    let mut path = String::with_capacity(raw.len() + 1);
    for segment in raw.split('/').filter(|segment| !segment.is_empty()) {
        path.push('/');
        path.push_str(&percent_decode(segment));
    }
    if path.is_empty() {
        path.push('/');
    }

    let segment_start = path.rfind('/').map_or(0, |pos| pos + 1);
    let extension = path[segment_start..].rfind('.').and_then(|dot| {
        let dot = segment_start + dot;
        let len = path.len() - dot;
        if dot > segment_start && len > 1 && len <= MAX_EXTENSION_LEN {
            Some(dot)
        } else {
            None
        }
    });
    let extension = extension.map(|dot| {
        let extension = path[dot..].to_owned();
        path.truncate(dot);
        extension
    });

    DecodedPath { path, extension }
}

/// Parses a query string (`a=1&b=2`) into it's percent-decoded pairs.
///
/// A pair without `=` gets an empty value; empty pairs are skipped.
/// If `plus_as_space`, `+` is replaced by a space before decoding, as in form bodies.
#[must_use]
pub fn query(query: &str, plus_as_space: bool) -> Vec<(String, String)> {
    let decode = |text: &str| -> String {
        if plus_as_space && text.contains('+') {
            percent_decode(&text.replace('+', " ")).into_owned()
        } else {
            percent_decode(text).into_owned()
        }
    };
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, value)) => (decode(name), decode(value)),
            None => (decode(pair), String::new()),
        })
        .collect()
}

/// Gets the lower-cased media type of a `content-type` value, without parameters.
#[must_use]
pub fn media_type(content_type: &str) -> CompactString {
    let media = content_type
        .split_once(';')
        .map_or(content_type, |(media, _)| media);
    media.trim().to_ascii_lowercase().to_compact_string()
}

/// Removes the surrounding quotes of a quoted-string, unescaping `\"` and `\\`.
#[must_use]
pub fn unquote(value: &str) -> Cow<'_, str> {
    let value = value.trim();
    match value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
    {
        Some(inner) if inner.contains('\\') => {
            let mut unescaped = String::with_capacity(inner.len());
            let mut escaped = false;
            for c in inner.chars() {
                if escaped || c != '\\' {
                    unescaped.push(c);
                    escaped = false;
                } else {
                    escaped = true;
                }
            }
            Cow::Owned(unescaped)
        }
        Some(inner) => Cow::Borrowed(inner),
        None => Cow::Borrowed(value),
    }
}

/// Gets the parameter `name` of a header value with `;`-separated parameters,
/// such as `content-type` and `content-disposition`.
///
/// The first element (the media type or disposition type) is skipped.
#[must_use]
pub fn header_parameter<'a>(value: &'a str, name: &str) -> Option<Cow<'a, str>> {
    value.split(';').skip(1).find_map(|parameter| {
        let (key, value) = parameter.split_once('=')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(unquote(value))
        } else {
            None
        }
    })
}

/// Gets the multipart boundary of a `content-type` value.
///
/// # Errors
///
/// Returns [`Error::InvalidBoundary`] if the parameter is missing or empty,
/// or if it contains anything but printable ASCII.
pub fn boundary(content_type: &str) -> Result<String, Error> {
    let boundary = header_parameter(content_type, "boundary").ok_or(Error::InvalidBoundary)?;
    if boundary.is_empty()
        || !boundary
            .bytes()
            .all(|byte| (chars::SPACE..=chars::TILDE).contains(&byte))
    {
        return Err(Error::InvalidBoundary);
    }
    Ok(boundary.into_owned())
}

/// The parsed `content-disposition` of a multipart section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentDisposition {
    /// The disposition type, lower-cased. Normally `form-data`.
    pub kind: CompactString,
    /// The name of the form field.
    pub name: Option<String>,
    /// The name of the uploaded file.
    pub filename: Option<String>,
}
/// Parses a `content-disposition` header value.
#[must_use]
pub fn content_disposition(value: &str) -> ContentDisposition {
    ContentDisposition {
        kind: media_type(value),
        name: header_parameter(value, "name").map(Cow::into_owned),
        filename: header_parameter(value, "filename").map(Cow::into_owned),
    }
}

/// Gets the value of cookie `name` from a `cookie` header value.
#[must_use]
pub fn cookie<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim().trim_matches('"'))
        } else {
            None
        }
    })
}

/// Parses the size of a chunk, from a chunked body's size line.
///
/// Chunk extensions (after a `;`) are ignored.
///
/// # Errors
///
/// [`Error::InvalidChunkSize`] if the size isn't hexadecimal or overflows.
pub fn chunk_size(line: &[u8]) -> Result<usize, Error> {
    let size = match line.iter().position(|byte| *byte == chars::SEMICOLON) {
        Some(end) => &line[..end],
        None => line,
    };
    let size = trim(size);
    if size.is_empty() || size.len() > 15 || !size.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::InvalidChunkSize);
    }
    // ok, we checked it's only hexdigits above
    let size = str::from_utf8(size).map_err(|_| Error::InvalidChunkSize)?;
    usize::from_str_radix(size, 16).map_err(|_| Error::InvalidChunkSize)
}

/// Encodes `body` using chunked transfer-encoding.
///
/// The body is split according to `chunk_lengths`; zero lengths are skipped.
/// When the lengths are exhausted, the rest of `body` is written as one chunk.
#[must_use]
pub fn encode_chunked(body: &[u8], chunk_lengths: impl IntoIterator<Item = usize>) -> Bytes {
    fn chunk(buffer: &mut BytesMut, data: &[u8]) {
        buffer.extend(format!("{:x}\r\n", data.len()).as_bytes());
        buffer.extend(data);
        buffer.extend(b"\r\n");
    }
    let mut buffer = BytesMut::with_capacity(body.len() + 32);
    let mut rest = body;
    for len in chunk_lengths {
        if rest.is_empty() {
            break;
        }
        if len == 0 {
            continue;
        }
        let (data, remaining) = rest.split_at(len.min(rest.len()));
        chunk(&mut buffer, data);
        rest = remaining;
    }
    if !rest.is_empty() {
        chunk(&mut buffer, rest);
    }
    buffer.extend(b"0\r\n\r\n");
    buffer.freeze()
}

/// A pair of a value string and a quality of said value.
///
/// Often used in the `accept-*` HTTP headers.
#[derive(Debug, PartialEq)]
pub struct ValueQualitySet<'a> {
    /// The value with a quality
    pub value: &'a str,
    /// The quality of a value
    pub quality: f32,
}
impl PartialEq<str> for ValueQualitySet<'_> {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.value == other
    }
}

/// Parses a header with a value-quality list of pairs.
///
/// Very useful to parse `accept-*` HTTP headers.
#[must_use]
pub fn list_header(header: &str) -> Vec<ValueQualitySet<'_>> {
    header
        .split(',')
        .filter_map(|element| {
            let mut parts = element.split(';');
            let value = parts.next()?.trim();
            if value.is_empty() {
                return None;
            }
            let quality = parts
                .filter_map(|parameter| parameter.trim().strip_prefix("q="))
                .find_map(|quality| quality.trim().parse().ok())
                .unwrap_or(1.0);
            Some(ValueQualitySet { value, quality })
        })
        .collect()
}

/// Checks if a `accept-*` header value accepts `value` with a non-zero quality.
///
/// A `*` wildcard accepts everything it's quality allows.
#[must_use]
pub fn accepts(header: &str, value: &str) -> bool {
    let list = list_header(header);
    if let Some(set) = list.iter().find(|set| set.value.eq_ignore_ascii_case(value)) {
        return set.quality > 0.0;
    }
    list.iter()
        .find(|set| set.value == "*")
        .map_or(false, |set| set.quality > 0.0)
}
