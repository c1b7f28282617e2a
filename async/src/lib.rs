//! Async bits for the Hearth engine.
//!
//! This includes a buffered [`read::Reader`] which reads lines, exact lengths and
//! marker-delimited byte runs from a [`AsyncRead`]er,
//! a [`read`] module for reading `HTTP/1` request heads, chunked and multipart bodies,
//! and a [`mod@write`] module for writing `HTTP/1` responses.

#![deny(
    unreachable_pub,
    missing_debug_implementations,
    missing_docs,
    clippy::pedantic
)]
#![allow(clippy::missing_panics_doc, clippy::too_many_lines)]

pub mod prelude;

/// Writes HTTP/1 [`Response`](http::Response)s to a [`AsyncWrite`].
pub mod write {
    use crate::prelude::*;

    async fn headers(headers: &HeaderMap, mut writer: impl AsyncWrite + Unpin) -> io::Result<()> {
        for (name, value) in headers {
            writer.write_all(name.as_str().as_bytes()).await?;
            writer.write_all(b": ").await?;
            writer.write_all(value.as_bytes()).await?;
            writer.write_all(b"\r\n").await?;
        }
        Ok(())
    }
    macro_rules! write_bytes {
        ($writer:expr, $($bytes:expr $(,)?)+) => {
            $(
                $writer.write_all($bytes).await?;
            )*
        };
    }
    /// Writes `response` followed by `body`, then flushes `writer`.
    ///
    /// Writer should be buffered.
    ///
    /// # Errors
    ///
    /// Will pass any errors emitted from `writer`.
    pub async fn response<T>(
        response: &http::Response<T>,
        body: &[u8],
        mut writer: impl AsyncWrite + Unpin,
    ) -> io::Result<()> {
        let version = utils::parse::version_str(response.version()).as_bytes();
        let reason = response
            .status()
            .canonical_reason()
            .unwrap_or("")
            .as_bytes();

        write_bytes!(
            writer,
            version,
            b" ",
            response.status().as_str().as_bytes(),
            b" ",
            reason,
            b"\r\n"
        );

        headers(response.headers(), &mut writer).await?;

        write_bytes!(writer, b"\r\n", body);
        writer.flush().await?;
        Ok(())
    }

    /// Writes the provisional `100 Continue` status line, echoing `version`.
    ///
    /// # Errors
    ///
    /// Passes any errors from writing to `writer`.
    pub async fn continue_status(
        version: Version,
        mut writer: impl AsyncWrite + Unpin,
    ) -> io::Result<()> {
        let version = utils::parse::version_str(version).as_bytes();
        write_bytes!(writer, version, b" 100 Continue\r\n\r\n");
        writer.flush().await
    }
}

/// Reads HTTP/1 request heads and bodies from a [`AsyncRead`]er.
pub mod read {
    use crate::prelude::*;
    use log::debug;
    use memchr::memmem;
    use utils::parse::{self, Error};

    /// The default maximum length of a single line.
    pub const MAX_LINE_LENGTH: usize = 16 * 1024;
    /// The default maximum number of header lines.
    pub const MAX_HEADERS: usize = 100;
    const READ_SIZE: usize = 8 * 1024;
    const MAX_EMPTY_LINES: usize = 4;

    /// A buffered reader over a byte stream.
    ///
    /// All reads go through an internal buffer, so bytes read past the end of one
    /// message are kept for the next one on the same connection.
    ///
    /// I/O errors and timeouts are reported as [`Error::UnexpectedEnd`],
    /// as there is no way to continue on the stream after either.
    #[derive(Debug)]
    #[must_use]
    pub struct Reader<R> {
        inner: R,
        buffer: BytesMut,
        timeout: Option<Duration>,
        max_line_length: usize,
    }
    impl<R: AsyncRead + Unpin> Reader<R> {
        /// Creates a new reader without a read timeout.
        pub fn new(inner: R) -> Self {
            Self {
                inner,
                buffer: BytesMut::with_capacity(READ_SIZE),
                timeout: None,
                max_line_length: MAX_LINE_LENGTH,
            }
        }
        /// Sets the maximum time a single read on the stream can take.
        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = Some(timeout);
            self
        }
        /// Sets the maximum length of a line, excluding the line terminator.
        pub fn with_max_line_length(mut self, len: usize) -> Self {
            self.max_line_length = len;
            self
        }
        /// Sets the maximum time a single read on the stream can take.
        pub fn set_timeout(&mut self, timeout: Option<Duration>) {
            self.timeout = timeout;
        }
        /// Gets a reference to the underlying stream.
        pub fn get_ref(&self) -> &R {
            &self.inner
        }
        /// Gets a mutable reference to the underlying stream.
        ///
        /// Reading directly from it skips the buffered data.
        pub fn get_mut(&mut self) -> &mut R {
            &mut self.inner
        }
        /// Returns the underlying stream, discarding any buffered data.
        pub fn into_inner(self) -> R {
            self.inner
        }
        /// The bytes read from the stream but not yet consumed.
        #[must_use]
        pub fn buffered(&self) -> &[u8] {
            &self.buffer
        }

        /// Reads more data from the stream into the buffer.
        ///
        /// Returns the number of bytes read; zero means the stream is exhausted.
        ///
        /// # Errors
        ///
        /// Returns [`Error::UnexpectedEnd`] if the read fails or times out.
        pub async fn fill(&mut self) -> Result<usize, Error> {
            if self.buffer.capacity() - self.buffer.len() < READ_SIZE / 4 {
                self.buffer.reserve(READ_SIZE);
            }
            let timeout = self.timeout;
            let read = self.inner.read_buf(&mut self.buffer);
            let result = match timeout {
                Some(timeout) => tokio::time::timeout(timeout, read).await.map_err(|_| {
                    debug!("Read timed out after {timeout:?}");
                    Error::UnexpectedEnd
                })?,
                None => read.await,
            };
            result.map_err(|err| {
                debug!("Failed to read from stream: {err}");
                Error::UnexpectedEnd
            })
        }
        /// Gets the next byte without consuming it.
        ///
        /// Returns [`None`] if the stream is exhausted.
        ///
        /// # Errors
        ///
        /// See [`Self::fill`].
        pub async fn peek(&mut self) -> Result<Option<u8>, Error> {
            if self.buffer.is_empty() && self.fill().await? == 0 {
                return Ok(None);
            }
            Ok(self.buffer.first().copied())
        }

        /// Reads a line, without the trailing `\r\n` or `\n`.
        ///
        /// Returns [`None`] if the stream ends cleanly before any bytes of the line.
        ///
        /// # Errors
        ///
        /// [`Error::LineTooLong`] if no line break is found within the maximum length
        /// and [`Error::UnexpectedEnd`] if the stream ends in the middle of the line.
        pub async fn line(&mut self) -> Result<Option<Bytes>, Error> {
            let mut searched = 0;
            loop {
                if let Some(pos) = memchr::memchr(chars::LF, &self.buffer[searched..]) {
                    let pos = searched + pos;
                    if pos > self.max_line_length + 1 {
                        return Err(Error::LineTooLong);
                    }
                    let mut line = self.buffer.split_to(pos + 1);
                    line.truncate(pos);
                    if line.last() == Some(&chars::CR) {
                        line.truncate(pos - 1);
                    }
                    return Ok(Some(line.freeze()));
                }
                searched = self.buffer.len();
                if searched > self.max_line_length + 1 {
                    return Err(Error::LineTooLong);
                }
                if self.fill().await? == 0 {
                    return if self.buffer.is_empty() {
                        Ok(None)
                    } else {
                        Err(Error::UnexpectedEnd)
                    };
                }
            }
        }
        /// Like [`Self::line`], but the end of the stream is an error.
        ///
        /// # Errors
        ///
        /// See [`Self::line`].
        pub async fn require_line(&mut self) -> Result<Bytes, Error> {
            self.line().await?.ok_or(Error::UnexpectedEnd)
        }
        /// Reads exactly `len` bytes.
        ///
        /// # Errors
        ///
        /// Returns [`Error::UnexpectedEnd`] if the stream ends before `len` bytes are read.
        pub async fn exact(&mut self, len: usize) -> Result<Bytes, Error> {
            if self.buffer.len() < len {
                self.buffer.reserve(len - self.buffer.len());
            }
            while self.buffer.len() < len {
                if self.fill().await? == 0 {
                    return Err(Error::UnexpectedEnd);
                }
            }
            Ok(self.buffer.split_to(len).freeze())
        }
        /// Reads until `marker`, returning the bytes before it.
        /// The marker itself is consumed.
        ///
        /// # Errors
        ///
        /// Returns [`Error::BodyTooLarge`] if more than `max_len` bytes precede the marker
        /// and [`Error::UnexpectedEnd`] if the stream ends before it.
        pub async fn until(&mut self, marker: &[u8], max_len: usize) -> Result<Bytes, Error> {
            let finder = memmem::Finder::new(marker);
            let mut searched = 0;
            loop {
                if let Some(pos) = finder.find(&self.buffer[searched..]) {
                    let pos = searched + pos;
                    if pos > max_len {
                        return Err(Error::BodyTooLarge);
                    }
                    let data = self.buffer.split_to(pos).freeze();
                    let _marker = self.buffer.split_to(marker.len());
                    return Ok(data);
                }
                // the marker might start in the last bytes
                searched = self
                    .buffer
                    .len()
                    .saturating_sub(marker.len().saturating_sub(1));
                if searched > max_len {
                    return Err(Error::BodyTooLarge);
                }
                if self.fill().await? == 0 {
                    return Err(Error::UnexpectedEnd);
                }
            }
        }
    }

    /// The request line and headers of a request.
    #[derive(Debug)]
    pub struct Head {
        /// The requested method.
        pub method: Method,
        /// The raw request target, path and query, not decoded.
        pub target: String,
        /// The protocol version.
        pub version: Version,
        /// The headers, with lower-case names.
        pub headers: HeaderMap,
    }

    /// Reads the request line and headers of the next request.
    ///
    /// Returns [`None`] if the peer closed the stream before sending anything.
    /// A few empty lines before the request line are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] early if the stream doesn't look like HTTP/1
    /// (e.g. a TLS handshake) and any error from [`parse::request_line`],
    /// [`headers`] and the [`Reader`].
    pub async fn head<R: AsyncRead + Unpin>(
        reader: &mut Reader<R>,
        max_headers: usize,
    ) -> Result<Option<Head>, Error> {
        let mut empty = 0;
        let line = loop {
            match reader.peek().await? {
                None => return Ok(None),
                Some(byte)
                    if !(byte.is_ascii_uppercase() || byte == chars::CR || byte == chars::LF) =>
                {
                    return Err(Error::Syntax)
                }
                Some(_) => {}
            }
            match reader.line().await? {
                None => return Ok(None),
                Some(line) if line.is_empty() => {
                    empty += 1;
                    if empty > MAX_EMPTY_LINES {
                        return Err(Error::Syntax);
                    }
                }
                Some(line) => break line,
            }
        };
        let request_line = parse::request_line(&line)?;
        let method = request_line.method;
        let version = request_line.version;
        let target = request_line.target.to_owned();

        let headers = headers(reader, max_headers).await?;
        Ok(Some(Head {
            method,
            target,
            version,
            headers,
        }))
    }

    /// Reads header lines until an empty line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyHeaders`] if there are more than `max_lines` lines,
    /// any error of [`parse::header_line`] and of reading lines.
    pub async fn headers<R: AsyncRead + Unpin>(
        reader: &mut Reader<R>,
        max_lines: usize,
    ) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        for _ in 0..=max_lines {
            let line = reader.require_line().await?;
            if line.is_empty() {
                return Ok(headers);
            }
            let (name, value) = parse::header_line(&line)?;
            headers.append(name, value);
        }
        Err(Error::TooManyHeaders)
    }

    /// Reads a body of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BodyTooLarge`] if `len` exceeds `max_len`, before reading anything.
    pub async fn length<R: AsyncRead + Unpin>(
        reader: &mut Reader<R>,
        len: usize,
        max_len: usize,
    ) -> Result<Bytes, Error> {
        if len > max_len {
            return Err(Error::BodyTooLarge);
        }
        reader.exact(len).await
    }

    /// Reads a body with chunked transfer-encoding, returning the concatenated chunks.
    ///
    /// Trailer fields after the last chunk are read and discarded.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidChunkSize`] and [`Error::TruncatedChunk`] for malformed chunks,
    /// [`Error::BodyTooLarge`] if the sum of chunks exceeds `max_len`.
    pub async fn chunked<R: AsyncRead + Unpin>(
        reader: &mut Reader<R>,
        max_len: usize,
    ) -> Result<Bytes, Error> {
        let mut body = BytesMut::new();
        loop {
            let line = reader.require_line().await?;
            let size = parse::chunk_size(&line)?;
            if size == 0 {
                break;
            }
            if body.len() + size > max_len {
                return Err(Error::BodyTooLarge);
            }
            let chunk = reader.exact(size).await?;
            body.extend_from_slice(&chunk);
            if !reader.require_line().await?.is_empty() {
                return Err(Error::TruncatedChunk);
            }
        }
        // trailers
        for _ in 0..=MAX_HEADERS {
            if reader.require_line().await?.is_empty() {
                return Ok(body.freeze());
            }
        }
        Err(Error::TooManyHeaders)
    }

    /// A section of a `multipart/form-data` body.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Section {
        /// The `name` parameter of the `content-disposition`.
        pub name: Option<String>,
        /// The `filename` parameter of the `content-disposition`.
        pub filename: Option<String>,
        /// The headers of this section.
        /// Empty for the data before the first boundary.
        pub headers: HeaderMap,
        /// The raw content.
        pub content: Bytes,
    }
    impl Section {
        fn new(headers: HeaderMap, content: Bytes) -> Self {
            let disposition = headers
                .get("content-disposition")
                .and_then(|value| value.to_str().ok())
                .map(parse::content_disposition)
                .unwrap_or_default();
            Self {
                name: disposition.name,
                filename: disposition.filename,
                headers,
                content,
            }
        }
    }

    /// Checks the rest of a boundary line. Returns `true` if it's the closing boundary.
    fn boundary_end(rest: &[u8]) -> Result<bool, Error> {
        if rest.starts_with(b"--") {
            Ok(true)
        } else if parse::trim(rest).is_empty() {
            Ok(false)
        } else {
            Err(Error::InvalidMultipart)
        }
    }

    /// Reads a `multipart/form-data` body delimited by `boundary`.
    ///
    /// Data before the first boundary line is returned as a section without headers,
    /// if it isn't empty. The reading stops after the closing `--boundary--` line.
    ///
    /// To parse a buffered body, pass a [`Reader`] over the bytes.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMultipart`] if a boundary line is followed by garbage,
    /// [`Error::BodyTooLarge`] if the sections exceed `max_len` and any error
    /// from reading headers.
    pub async fn multipart<R: AsyncRead + Unpin>(
        reader: &mut Reader<R>,
        boundary: &str,
        max_len: usize,
    ) -> Result<Vec<Section>, Error> {
        let mut delimiter = Vec::with_capacity(boundary.len() + 4);
        delimiter.extend_from_slice(b"\r\n--");
        delimiter.extend_from_slice(boundary.as_bytes());

        let mut sections = Vec::new();
        let mut remaining = max_len;

        let preamble = reader.until(&delimiter[2..], remaining).await?;
        remaining -= preamble.len();
        let preamble = match preamble.strip_suffix(b"\r\n") {
            Some(stripped) => preamble.slice(..stripped.len()),
            None => preamble,
        };
        if !preamble.is_empty() {
            sections.push(Section::new(HeaderMap::new(), preamble));
        }

        let mut end = boundary_end(&reader.require_line().await?)?;
        while !end {
            let headers = headers(reader, MAX_HEADERS).await?;
            let content = reader.until(&delimiter, remaining).await?;
            remaining -= content.len();
            sections.push(Section::new(headers, content));
            end = boundary_end(&reader.require_line().await?)?;
        }
        Ok(sections)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn over(bytes: &[u8]) -> Reader<&[u8]> {
            Reader::new(bytes)
        }

        #[tokio::test]
        async fn lines() {
            let mut reader = over(b"first\r\nsecond\n\r\nlast");
            assert_eq!(reader.line().await.unwrap().unwrap(), "first");
            assert_eq!(reader.line().await.unwrap().unwrap(), "second");
            assert_eq!(reader.line().await.unwrap().unwrap(), "");
            assert_eq!(reader.line().await.unwrap_err(), Error::UnexpectedEnd);

            let mut reader = over(b"only\r\n");
            assert!(reader.line().await.unwrap().is_some());
            assert_eq!(reader.line().await.unwrap(), None);
        }

        #[tokio::test]
        async fn long_line() {
            let long = vec![b'a'; 64];
            let mut reader = over(&long).with_max_line_length(16);
            assert_eq!(reader.line().await.unwrap_err(), Error::LineTooLong);
        }

        #[tokio::test]
        async fn request_head() {
            let mut reader = over(
                b"\r\nPOST /upload?x=1 HTTP/1.1\r\nHost: localhost\r\nX-Many: a\r\nx-many: b\r\n\r\nbody",
            );
            let parsed = head(&mut reader, MAX_HEADERS).await.unwrap().unwrap();
            assert_eq!(parsed.method, Method::POST);
            assert_eq!(parsed.target, "/upload?x=1");
            assert_eq!(parsed.version, Version::HTTP_11);
            assert_eq!(parsed.headers.get("host").unwrap(), "localhost");
            assert_eq!(parsed.headers.get_all("x-many").iter().count(), 2);
            assert_eq!(reader.buffered(), b"body");

            let mut reader = over(b"");
            assert!(head(&mut reader, MAX_HEADERS).await.unwrap().is_none());

            let mut reader = over(b"\x16\x03\x01\x02\x00\x01\x00\x01\xfc\x03\x03");
            assert_eq!(
                head(&mut reader, MAX_HEADERS).await.unwrap_err(),
                Error::Syntax
            );

            let mut reader = over(b"GET / HTTP/1.1\r\nbroken header\r\n\r\n");
            assert_eq!(
                head(&mut reader, MAX_HEADERS).await.unwrap_err(),
                Error::MissingColon
            );

            let mut reader = over(b"GET / HTTP/1.1\r\na: 1\r\nb: 2\r\nc: 3\r\n\r\n");
            assert_eq!(
                head(&mut reader, 2).await.unwrap_err(),
                Error::TooManyHeaders
            );
        }

        #[tokio::test]
        async fn chunked_round_trip() {
            let body: Vec<u8> = (0..=255_u8).cycle().take(3000).collect();
            let splits: [&[usize]; 5] = [&[], &[1], &[7, 0, 13, 1000], &[3000], &[2999, 1, 5]];
            for sizes in splits {
                let encoded = parse::encode_chunked(&body, sizes.iter().copied());
                let mut reader = over(&encoded);
                let decoded = chunked(&mut reader, usize::MAX).await.unwrap();
                assert_eq!(decoded, body, "chunk sizes {sizes:?}");
                assert!(reader.buffered().is_empty());
            }
        }

        #[tokio::test]
        async fn chunked_trailers_and_extensions() {
            let mut reader =
                over(b"5;ext=1\r\nhello\r\n0\r\nExpires: never\r\n\r\nGET / HTTP/1.1\r\n");
            assert_eq!(chunked(&mut reader, 1024).await.unwrap(), "hello");
            // the next request is left untouched
            assert_eq!(reader.buffered(), b"GET / HTTP/1.1\r\n");
        }

        #[tokio::test]
        async fn chunked_errors() {
            let mut reader = over(b"5\r\nhelloX\r\n0\r\n\r\n");
            assert_eq!(
                chunked(&mut reader, 1024).await.unwrap_err(),
                Error::TruncatedChunk
            );
            let mut reader = over(b"zz\r\n");
            assert_eq!(
                chunked(&mut reader, 1024).await.unwrap_err(),
                Error::InvalidChunkSize
            );
            let mut reader = over(b"a\r\nhel");
            assert_eq!(
                chunked(&mut reader, 1024).await.unwrap_err(),
                Error::UnexpectedEnd
            );
            let mut reader = over(b"10\r\n0123456789abcdef\r\n0\r\n\r\n");
            assert_eq!(
                chunked(&mut reader, 8).await.unwrap_err(),
                Error::BodyTooLarge
            );
        }

        #[tokio::test]
        async fn two_sections() {
            let body = b"--X\r\n\
                Content-Disposition: form-data; name=\"a\"\r\n\
                \r\n\
                1\r\n\
                --X\r\n\
                Content-Disposition: form-data; name=\"b\"; filename=\"f.txt\"\r\n\
                Content-Type: text/plain\r\n\
                \r\n\
                23\r\n\
                --X--\r\n";
            let mut reader = over(body);
            let sections = multipart(&mut reader, "X", usize::MAX).await.unwrap();
            assert_eq!(sections.len(), 2);

            assert_eq!(sections[0].name.as_deref(), Some("a"));
            assert_eq!(sections[0].filename, None);
            assert_eq!(sections[0].content, "1");

            assert_eq!(sections[1].name.as_deref(), Some("b"));
            assert_eq!(sections[1].filename.as_deref(), Some("f.txt"));
            assert_eq!(sections[1].content, "23");
            assert_eq!(
                sections[1].headers.get("content-type").unwrap(),
                "text/plain"
            );
            assert!(reader.buffered().is_empty());
        }

        #[tokio::test]
        async fn preamble_section() {
            let body = b"intro text\r\n--X\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n\r\n--X--\r\nnext";
            let mut reader = over(body);
            let sections = multipart(&mut reader, "X", 1024).await.unwrap();
            assert_eq!(sections.len(), 2);
            assert!(sections[0].headers.is_empty());
            assert_eq!(sections[0].name, None);
            assert_eq!(sections[0].content, "intro text");
            assert_eq!(sections[1].name.as_deref(), Some("a"));
            assert!(sections[1].content.is_empty());
            assert_eq!(reader.buffered(), b"next");
        }

        #[tokio::test]
        async fn multipart_errors() {
            let mut reader = over(b"--X\r\nContent-Disposition: form-data\r\n\r\nnever ends");
            assert_eq!(
                multipart(&mut reader, "X", 1024).await.unwrap_err(),
                Error::UnexpectedEnd
            );
            let mut reader = over(b"--Xgarbage\r\n\r\n--X--\r\n");
            assert_eq!(
                multipart(&mut reader, "X", 1024).await.unwrap_err(),
                Error::InvalidMultipart
            );
            let mut reader = over(b"--X\r\nno colon\r\n\r\n\r\n--X--\r\n");
            assert_eq!(
                multipart(&mut reader, "X", 1024).await.unwrap_err(),
                Error::MissingColon
            );
        }

        #[tokio::test]
        async fn until_limit() {
            let mut reader = over(b"0123456789--end");
            assert_eq!(
                reader.until(b"--end", 4).await.unwrap_err(),
                Error::BodyTooLarge
            );
            let mut reader = over(b"0123456789--endrest");
            assert_eq!(reader.until(b"--end", 64).await.unwrap(), "0123456789");
            assert_eq!(reader.exact(4).await.unwrap(), "rest");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::prelude::*;

    #[tokio::test]
    async fn write_response() {
        let response = http::Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("content-length", "2")
            .body(())
            .unwrap();
        let mut output = Vec::new();
        crate::write::response(&response, b"no", &mut output)
            .await
            .unwrap();
        assert_eq!(
            output,
            b"HTTP/1.1 404 Not Found\r\ncontent-length: 2\r\n\r\nno"
        );

        let mut output = Vec::new();
        crate::write::continue_status(Version::HTTP_10, &mut output)
            .await
            .unwrap();
        assert_eq!(output, b"HTTP/1.0 100 Continue\r\n\r\n");
    }
}
