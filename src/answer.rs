//! The [`Answer`] to a request, and the conversion of it to a HTTP response.
//!
//! Also contains the compression decision and the formatting of HTTP dates.

use crate::prelude::*;
use time::{macros::format_description, OffsetDateTime};

/// Payloads smaller than this aren't compressed.
pub const COMPRESSION_THRESHOLD: usize = 128;

/// Formats `date` as a HTTP date, as in the `date` header.
#[must_use]
pub fn http_date(date: OffsetDateTime) -> String {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    date.to_offset(time::UtcOffset::UTC)
        .format(format)
        // every component of the format is in a `OffsetDateTime`
        .unwrap_or_default()
}

/// A finished answer, ready to be written to the client.
#[derive(Debug, Clone)]
#[must_use]
pub struct Answer {
    status: StatusCode,
    content: Bytes,
    headers: HeaderMap,
    content_type: CompactString,
    content_language: Option<CompactString>,
    allow_compression: bool,
    close: bool,
    cache_lifetime: Option<Duration>,
}
impl Answer {
    /// Creates a `200 OK` answer of `content` with `content_type`.
    pub fn new(content: impl Into<Bytes>, content_type: impl Into<CompactString>) -> Self {
        Self {
            status: StatusCode::OK,
            content: content.into(),
            headers: HeaderMap::new(),
            content_type: content_type.into(),
            content_language: None,
            allow_compression: true,
            close: false,
            cache_lifetime: None,
        }
    }
    /// Creates a answer of `content` rendered in `format`.
    pub fn formatted(status: StatusCode, content: Bytes, format: Format) -> Self {
        Self::new(content, format.content_type()).with_status(status)
    }
    /// A hard-coded HTML error page, for when nothing is known of the client's preferences.
    pub fn hardcoded(status: StatusCode, message: Option<&str>) -> Self {
        Self::new(
            utils::hardcoded_error_body(status, message.map(str::as_bytes)),
            "text/html; charset=utf-8",
        )
        .with_status(status)
    }
    /// Sets the status.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
    /// Adds a header. Headers the engine sets on writing take precedence.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }
    /// Sets the `content-language`. The server's language is used if this isn't set.
    pub fn with_language(mut self, language: impl Into<CompactString>) -> Self {
        self.content_language = Some(language.into());
        self
    }
    /// Disallows compression of this answer.
    pub fn without_compression(mut self) -> Self {
        self.allow_compression = false;
        self
    }
    /// Closes the connection after this answer is written.
    pub fn closing(mut self) -> Self {
        self.close = true;
        self
    }
    /// Lets the client cache this answer for `lifetime`,
    /// through `cache-control` and `expires`.
    pub fn cache_for(mut self, lifetime: Duration) -> Self {
        self.cache_lifetime = Some(lifetime);
        self
    }

    /// The status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
    /// The content, possibly compressed.
    #[must_use]
    pub fn content(&self) -> &Bytes {
        &self.content
    }
    /// The headers added to this answer.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    /// Mutable access to the headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
    /// The `content-type`.
    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }
    /// If the connection is closed after this answer.
    #[must_use]
    pub fn close(&self) -> bool {
        self.close
    }
    /// Marks the connection to close after this answer.
    pub fn set_close(&mut self) {
        self.close = true;
    }
    /// If this answer is compressed with gzip.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        utils::header_eq(&self.headers, "content-encoding", "gzip")
    }
    /// Merges `headers` into this answer, skipping the names already present.
    pub fn merge_headers(&mut self, headers: HeaderMap) {
        let mut last = None;
        for (name, value) in headers {
            // `None` means the same name as the last one
            let name = match name {
                Some(name) => {
                    if self.headers.contains_key(&name) {
                        last = None;
                        continue;
                    }
                    last = Some(name.clone());
                    name
                }
                None => match &last {
                    Some(name) => name.clone(),
                    None => continue,
                },
            };
            self.headers.append(name, value);
        }
    }

    /// Compresses the content with gzip if
    /// - the request accepts it (`accepts_gzip`),
    /// - compression is allowed on this answer and by the server,
    /// - the content is larger than [`COMPRESSION_THRESHOLD`] and
    /// - the compressed content is strictly smaller.
    ///
    /// Returns whether the content was compressed.
    pub fn compress(&mut self, accepts_gzip: bool, disabled: bool) -> bool {
        if !accepts_gzip
            || disabled
            || !self.allow_compression
            || self.content.len() <= COMPRESSION_THRESHOLD
            || self.is_compressed()
        {
            return false;
        }
        match gzip(&self.content) {
            Some(compressed) if compressed.len() < self.content.len() => {
                self.content = compressed;
                utils::replace_header_static(&mut self.headers, "content-encoding", "gzip");
                true
            }
            _ => false,
        }
    }

    /// Converts to a response with all the headers the engine writes, and the content.
    ///
    /// `content-length` always reflects [`Self::content`].
    ///
    /// `version` is the version of the request; `server_name` and `language` come
    /// from the server's options.
    pub fn into_response(
        self,
        version: Version,
        server_name: &str,
        language: &str,
        close: bool,
    ) -> (http::Response<()>, Bytes) {
        let mut builder = http::Response::builder()
            .status(self.status)
            .version(version);
        let mut headers = self.headers;
        let now = OffsetDateTime::now_utc();

        macro_rules! set {
            ($name:expr, $value:expr) => {
                if let Ok(value) = HeaderValue::try_from($value) {
                    utils::replace_header(&mut headers, $name, value);
                }
            };
        }
        set!("date", http_date(now));
        set!("server", server_name);
        utils::replace_header_static(
            &mut headers,
            "connection",
            if close || self.close {
                "close"
            } else {
                "persistent"
            },
        );
        utils::set_content_length(&mut headers, self.content.len());
        set!("content-type", self.content_type.as_str());
        set!(
            "content-language",
            self.content_language.as_deref().unwrap_or(language)
        );
        if let Some(lifetime) = self.cache_lifetime {
            set!(
                "cache-control",
                format!("public, max-age={}", lifetime.as_secs())
            );
            set!("expires", http_date(now + lifetime));
        }

        if let Some(map) = builder.headers_mut() {
            *map = headers;
        }
        // the status and version are valid; the only input
        let response = builder.body(()).unwrap_or_else(|_| http::Response::new(()));
        (response, self.content)
    }
}
#[cfg(feature = "gzip")]
fn gzip(bytes: &[u8]) -> Option<Bytes> {
    use bytes::BufMut;

    let buffer = BytesMut::with_capacity(bytes.len() / 2 + 64).writer();
    let mut encoder = flate2::write::GzEncoder::new(buffer, flate2::Compression::fast());
    if let Err(err) = encoder.write_all(bytes) {
        warn!("Failed to compress using gzip: {err}");
        return None;
    }
    match encoder.finish() {
        Ok(buffer) => Some(buffer.into_inner().freeze()),
        Err(err) => {
            warn!("Failed to compress using gzip: {err}");
            None
        }
    }
}
#[cfg(not(feature = "gzip"))]
fn gzip(_bytes: &[u8]) -> Option<Bytes> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn large() -> Answer {
        Answer::new("hello ".repeat(100), "text/plain")
    }

    #[test]
    fn date_format() {
        let date = time::macros::datetime!(1994-11-06 08:49:37 UTC);
        assert_eq!(http_date(date), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn compression_decision() {
        let mut answer = large();
        assert!(!answer.compress(false, false));
        assert!(!answer.compress(true, true));
        assert!(answer.compress(true, false));
        assert!(answer.is_compressed());
        assert!(answer.content().len() < 600);
        // never twice
        assert!(!answer.compress(true, false));

        let mut small = Answer::new("x".repeat(COMPRESSION_THRESHOLD), "text/plain");
        assert!(!small.compress(true, false));

        let mut disallowed = large().without_compression();
        assert!(!disallowed.compress(true, false));
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn incompressible() {
        use rand::RngCore;
        let mut noise = vec![0; 512];
        rand::thread_rng().fill_bytes(&mut noise);
        let mut answer = Answer::new(noise, "application/octet-stream");
        assert!(!answer.compress(true, false));
        assert!(!answer.is_compressed());
        assert_eq!(answer.content().len(), 512);
    }

    #[test]
    fn response_headers() {
        let answer = Answer::new("body", "text/plain")
            .with_status(StatusCode::CREATED)
            .with_header(
                HeaderName::from_static("server"),
                HeaderValue::from_static("overridden"),
            )
            .with_header(
                HeaderName::from_static("x-custom"),
                HeaderValue::from_static("1"),
            )
            .cache_for(Duration::from_secs(60));
        let (response, body) = answer.into_response(Version::HTTP_11, "hearth", "en", false);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body, "body");
        let headers = response.headers();
        assert_eq!(headers.get("server").unwrap(), "hearth");
        assert_eq!(headers.get("connection").unwrap(), "persistent");
        assert_eq!(headers.get("content-length").unwrap(), "4");
        assert_eq!(headers.get("content-language").unwrap(), "en");
        assert_eq!(headers.get("x-custom").unwrap(), "1");
        assert_eq!(headers.get("cache-control").unwrap(), "public, max-age=60");
        assert!(headers.get("date").unwrap().to_str().unwrap().ends_with(" GMT"));
        assert!(headers.contains_key("expires"));

        let (response, _) = Answer::hardcoded(StatusCode::BAD_REQUEST, None)
            .closing()
            .into_response(Version::HTTP_10, "hearth", "sv", false);
        assert_eq!(response.headers().get("connection").unwrap(), "close");
        assert_eq!(response.headers().get("content-language").unwrap(), "sv");
        assert_eq!(response.version(), Version::HTTP_10);
    }

    #[test]
    fn merging() {
        let mut answer = Answer::new("", "text/plain").with_header(
            HeaderName::from_static("set-cookie"),
            HeaderValue::from_static("a=1"),
        );
        let mut leftover = HeaderMap::new();
        leftover.append("set-cookie", HeaderValue::from_static("b=2"));
        leftover.append("vary", HeaderValue::from_static("a"));
        leftover.append("vary", HeaderValue::from_static("b"));
        answer.merge_headers(leftover);
        assert_eq!(answer.headers().get_all("set-cookie").iter().count(), 1);
        assert_eq!(answer.headers().get_all("vary").iter().count(), 2);
    }
}
