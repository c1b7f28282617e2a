//! The parsed [`Request`], and the parsing of it from a connection.
//!
//! [`parse`] reads the body of a request after it's [`Head`] according to the framing
//! (`content-length` or `transfer-encoding: chunked`) and decodes it according to
//! the `content-type`.

use crate::prelude::{internals::*, *};
use async_bits::read::{self, Head};
use std::str::FromStr;

/// A immutable, fully parsed request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    version: Version,
    path: String,
    extension: Option<String>,
    headers: HeaderMap,
    parameters: HashMap<String, String>,
    body: Option<Bytes>,
    sections: Option<Vec<Section>>,
    address: SocketAddr,
    local_port: u16,
}
impl Request {
    /// The method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }
    /// The protocol version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }
    /// The decoded path, without the extension.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
    /// The extension of the last path segment, with the dot. E.g. `.json`
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }
    /// The output [`Format`] requested through the [`Self::extension`].
    #[must_use]
    pub fn format(&self) -> Format {
        Format::from_extension(self.extension())
    }
    /// The headers, with lower-case names.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
    /// Gets the value of header `name` if it's valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
    /// The `user-agent`, or a empty string.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }
    /// All parameters of the query and form body.
    #[must_use]
    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }
    /// Gets the raw parameter `name`.
    #[must_use]
    pub fn parameter_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
    /// Gets the parameter `name`, parsed to `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidParameters`] if the parameter is missing or can't be parsed.
    pub fn parameter<T: FromStr>(&self, name: &str) -> Result<T, Error> {
        self.optional_parameter(name)?.ok_or_else(|| {
            Error::invalid_parameters(format_compact!("missing parameter `{name}`"))
        })
    }
    /// Gets the parameter `name`, parsed to `T`, if it's present.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::InvalidParameters`] if the parameter can't be parsed.
    pub fn optional_parameter<T: FromStr>(&self, name: &str) -> Result<Option<T>, Error> {
        self.parameter_str(name)
            .map(|value| {
                value.parse().map_err(|_| {
                    Error::invalid_parameters(format_compact!(
                        "parameter `{name}` has a invalid value"
                    ))
                })
            })
            .transpose()
    }
    /// The opaque body of a `application/octet-stream` request.
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
    /// The sections of a `multipart/form-data` request.
    #[must_use]
    pub fn sections(&self) -> Option<&[Section]> {
        self.sections.as_deref()
    }
    /// Gets the multipart section named `name`.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .as_deref()?
            .iter()
            .find(|section| section.name.as_deref() == Some(name))
    }
    /// The address of the client.
    #[must_use]
    pub fn address(&self) -> SocketAddr {
        self.address
    }
    /// The port this request was received on.
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_port
    }
    /// If the client wants to keep the connection open after this request.
    ///
    /// HTTP/1.1 keeps it open unless `connection: close`,
    /// HTTP/1.0 only with `connection: keep-alive`.
    #[must_use]
    pub fn keep_alive(&self) -> bool {
        if utils::header_contains(&self.headers, "connection", "close") {
            return false;
        }
        self.version != Version::HTTP_10
            || utils::header_contains(&self.headers, "connection", "keep-alive")
    }
    /// If the client accepts a gzip-encoded answer.
    #[must_use]
    pub fn accepts_gzip(&self) -> bool {
        self.header("accept-encoding")
            .map_or(false, |header| parse::accepts(header, "gzip"))
    }
}

/// Builds a [`Request`] incrementally.
#[derive(Debug)]
#[must_use]
pub struct RequestBuilder {
    request: Request,
    path_decoded: bool,
}
impl RequestBuilder {
    /// Creates a builder for a request of `method` with `version` from `address`.
    pub fn new(method: Method, version: Version, address: SocketAddr, local_port: u16) -> Self {
        Self {
            request: Request {
                method,
                version,
                path: "/".to_owned(),
                extension: None,
                headers: HeaderMap::new(),
                parameters: HashMap::new(),
                body: None,
                sections: None,
                address,
                local_port,
            },
            path_decoded: false,
        }
    }
    /// Sets the headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.request.headers = headers;
        self
    }
    /// Gets the headers.
    #[must_use]
    pub fn get_headers(&self) -> &HeaderMap {
        &self.request.headers
    }
    /// Decodes `text` into the request.
    ///
    /// The first call takes a request target: the path (and extension) are set and the
    /// query is added to the parameters. Later calls take a query string
    /// (e.g. a form body) which is only added to the parameters.
    /// Parameters which already exist are never overwritten.
    pub fn decode_url(&mut self, text: &str, plus_as_space: bool) -> &mut Self {
        let query = if self.path_decoded {
            Some(text)
        } else {
            let (path, query) = parse::split_target(text);
            let decoded = parse::path(path);
            self.request.path = decoded.path;
            self.request.extension = decoded.extension;
            self.path_decoded = true;
            query
        };
        if let Some(query) = query {
            for (name, value) in parse::query(query, plus_as_space) {
                self.request.parameters.entry(name).or_insert(value);
            }
        }
        self
    }
    /// Sets the opaque body.
    ///
    /// # Errors
    ///
    /// The body can only be set once; a second call is a [`ErrorKind::InternalServerError`].
    pub fn body(&mut self, body: Bytes) -> Result<&mut Self, Error> {
        if self.request.body.is_some() {
            return Err(Error::internal("request body set twice"));
        }
        self.request.body = Some(body);
        Ok(self)
    }
    /// Sets the multipart sections.
    pub fn sections(&mut self, sections: Vec<Section>) -> &mut Self {
        self.request.sections = Some(sections);
        self
    }
    /// Finishes the request.
    #[must_use]
    pub fn build(self) -> Request {
        self.request
    }
}

/// How the body of a request is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    None,
    Length(usize),
    Chunked,
}
fn framing(headers: &HeaderMap) -> Result<Framing, parse::Error> {
    if let Some(encoding) = headers.get("transfer-encoding") {
        let encoding = encoding
            .to_str()
            .map_err(|_| parse::Error::UnsupportedEncoding)?;
        // chunked has to be the only (and therefore last) encoding
        return if encoding.trim().eq_ignore_ascii_case("chunked") {
            Ok(Framing::Chunked)
        } else {
            Err(parse::Error::UnsupportedEncoding)
        };
    }
    Ok(match utils::content_length(headers)? {
        None | Some(0) => Framing::None,
        Some(len) => Framing::Length(len),
    })
}

/// Reads and decodes the body following `head` from `reader`.
///
/// If the client sent `expect: 100-continue`, a provisional `100 Continue`
/// is written before the body is read.
///
/// # Errors
///
/// Returns a classified error for all failures.
/// If [`Error::forces_close`] is true, the reader is at a unknown position in the stream.
pub async fn parse<S: AsyncRead + AsyncWrite + Unpin>(
    reader: &mut Reader<S>,
    head: Head,
    address: SocketAddr,
    local_port: u16,
    max_body_length: usize,
) -> Result<Request, Error> {
    let Head {
        method,
        target,
        version,
        headers,
    } = head;
    let mut builder = RequestBuilder::new(method, version, address, local_port).headers(headers);
    builder.decode_url(&target, false);

    let framing = framing(builder.get_headers())?;
    let content_type = builder
        .get_headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let media_type = content_type.as_deref().map(parse::media_type);
    let multipart = media_type.as_deref() == Some("multipart/form-data");

    if utils::header_eq(builder.get_headers(), "expect", "100-continue")
        && (framing != Framing::None || multipart)
    {
        async_bits::write::continue_status(version, reader.get_mut())
            .await
            .map_err(|err| Error::client(format_compact!("failed to write 100 Continue: {err}")))?;
    }

    if multipart {
        // `content_type` is some when `multipart` is true
        let boundary = parse::boundary(content_type.as_deref().unwrap_or_default())?;
        let sections = match framing {
            Framing::None => read::multipart(reader, &boundary, max_body_length).await?,
            Framing::Length(len) => {
                let body = read::length(reader, len, max_body_length).await?;
                read::multipart(&mut Reader::new(&body[..]), &boundary, len).await?
            }
            Framing::Chunked => {
                let body = read::chunked(reader, max_body_length).await?;
                let len = body.len();
                read::multipart(&mut Reader::new(&body[..]), &boundary, len).await?
            }
        };
        // from here on, the framing of the stream is intact
        builder.sections(sections);
        return Ok(builder.build());
    }

    let body = match framing {
        Framing::None => return Ok(builder.build()),
        Framing::Length(len) => read::length(reader, len, max_body_length).await?,
        Framing::Chunked => read::chunked(reader, max_body_length).await?,
    };
    if body.is_empty() {
        return Ok(builder.build());
    }

    match media_type.as_deref() {
        Some("application/x-www-form-urlencoded") => {
            let text = String::from_utf8_lossy(&body);
            builder.decode_url(&text, true);
        }
        Some("application/octet-stream") => {
            builder.body(body)?;
        }
        _ => return Err(parse::Error::UnsupportedContent.into()),
    }
    Ok(builder.build())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn address() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(net::Ipv4Addr::LOCALHOST), 50000)
    }
    /// Parses a full request from `bytes`, returning the request and everything written back.
    async fn parse_bytes(bytes: &[u8]) -> (Result<Request, Error>, Vec<u8>) {
        let (mut client, server) = tokio::io::duplex(64 * 1024);
        client.write_all(bytes).await.unwrap();
        client.shutdown().await.unwrap();
        let mut reader = Reader::new(server);
        let head = read::head(&mut reader, read::MAX_HEADERS)
            .await
            .unwrap()
            .unwrap();
        let request = super::parse(&mut reader, head, address(), 8080, 1024).await;
        drop(reader);
        let mut written = Vec::new();
        client.read_to_end(&mut written).await.unwrap();
        (request, written)
    }
    pub(crate) fn get(target: &str) -> Request {
        let mut builder = RequestBuilder::new(Method::GET, Version::HTTP_11, address(), 8080);
        builder.decode_url(target, false);
        builder.build()
    }

    #[test]
    fn decoding() {
        let request = get("/a//b/?x=1&y=2");
        assert_eq!(request.path(), "/a/b");
        assert_eq!(request.extension(), None);
        assert_eq!(request.parameters().len(), 2);
        assert_eq!(request.parameter_str("x"), Some("1"));
        assert_eq!(request.parameter::<u32>("y"), Ok(2));

        let request = get("/api/user%20list.json?id=x");
        assert_eq!(request.path(), "/api/user list");
        assert_eq!(request.format(), Format::Json);
        assert_eq!(
            request.parameter::<u32>("id").unwrap_err().kind(),
            ErrorKind::InvalidParameters
        );
        assert_eq!(
            request.parameter::<u32>("missing").unwrap_err().kind(),
            ErrorKind::InvalidParameters
        );
        assert_eq!(request.optional_parameter::<u32>("missing"), Ok(None));
    }

    #[test]
    fn second_decode_only_adds() {
        let mut builder = RequestBuilder::new(Method::POST, Version::HTTP_11, address(), 80);
        builder
            .decode_url("/form.xml?name=query", false)
            .decode_url("name=body&other=a+b&/x.json", true);
        let request = builder.build();
        assert_eq!(request.path(), "/form");
        assert_eq!(request.extension(), Some(".xml"));
        assert_eq!(request.parameter_str("name"), Some("query"));
        assert_eq!(request.parameter_str("other"), Some("a b"));
    }

    #[test]
    fn body_once() {
        let mut builder = RequestBuilder::new(Method::PUT, Version::HTTP_11, address(), 80);
        builder.body(Bytes::from_static(b"1")).unwrap();
        let error = builder.body(Bytes::from_static(b"2")).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InternalServerError);
    }

    #[test]
    fn keep_alive() {
        let mut headers = HeaderMap::new();
        let mut builder = RequestBuilder::new(Method::GET, Version::HTTP_10, address(), 80);
        assert!(!builder.request.keep_alive());
        headers.insert("connection", HeaderValue::from_static("Keep-Alive"));
        builder = builder.headers(headers.clone());
        assert!(builder.request.keep_alive());

        let builder = RequestBuilder::new(Method::GET, Version::HTTP_11, address(), 80);
        assert!(builder.request.keep_alive());
        headers.insert("connection", HeaderValue::from_static("close"));
        let builder = builder.headers(headers);
        assert!(!builder.request.keep_alive());
    }

    #[tokio::test]
    async fn form_body() {
        let (request, written) = parse_bytes(
            b"POST /login?user=query HTTP/1.1\r\n\
            content-type: application/x-www-form-urlencoded; charset=utf-8\r\n\
            content-length: 27\r\n\
            \r\n\
            user=body&password=a+b%21&x",
        )
        .await;
        let request = request.unwrap();
        assert!(written.is_empty());
        assert_eq!(request.parameter_str("user"), Some("query"));
        assert_eq!(request.parameter_str("password"), Some("a b!"));
        assert_eq!(request.parameter_str("x"), Some(""));
        assert!(request.body().is_none());
    }

    #[tokio::test]
    async fn octet_stream_chunked() {
        let (request, _) = parse_bytes(
            b"PUT /blob HTTP/1.1\r\n\
            content-type: application/octet-stream\r\n\
            transfer-encoding: chunked\r\n\
            \r\n\
            3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n",
        )
        .await;
        assert_eq!(request.unwrap().body().unwrap(), "abcde");
    }

    #[tokio::test]
    async fn continue_and_multipart() {
        let (request, written) = parse_bytes(
            b"POST /upload HTTP/1.1\r\n\
            expect: 100-continue\r\n\
            content-type: multipart/form-data; boundary=\"X\"\r\n\
            content-length: 130\r\n\
            \r\n\
            --X\r\n\
            content-disposition: form-data; name=\"a\"\r\n\
            \r\n\
            1\r\n\
            --X\r\n\
            content-disposition: form-data; name=\"b\"; filename=\"f.txt\"\r\n\
            \r\n\
            23\r\n\
            --X--\r\n",
        )
        .await;
        assert_eq!(written, b"HTTP/1.1 100 Continue\r\n\r\n");
        let request = request.unwrap();
        let sections = request.sections().unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(request.section("a").unwrap().content, "1");
        let file = request.section("b").unwrap();
        assert_eq!(file.filename.as_deref(), Some("f.txt"));
        assert_eq!(file.content, "23");
    }

    #[tokio::test]
    async fn streamed_multipart() {
        let (request, _) = parse_bytes(
            b"POST /upload HTTP/1.0\r\n\
            content-type: multipart/form-data; boundary=X\r\n\
            \r\n\
            --X\r\n\
            content-disposition: form-data; name=\"a\"\r\n\
            \r\n\
            1\r\n\
            --X--\r\n",
        )
        .await;
        assert_eq!(request.unwrap().section("a").unwrap().content, "1");
    }

    #[tokio::test]
    async fn content_errors() {
        let (request, _) = parse_bytes(
            b"POST / HTTP/1.1\r\ncontent-type: text/csv\r\ncontent-length: 3\r\n\r\na;b",
        )
        .await;
        let error = request.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnknownContent);
        // the body was consumed
        assert!(!error.forces_close());

        let (request, _) = parse_bytes(
            b"POST / HTTP/1.1\r\ncontent-type: multipart/form-data; boundary=\"\"\r\n\r\n",
        )
        .await;
        let error = request.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::UnknownContent);
        assert!(error.forces_close());

        let (request, _) =
            parse_bytes(b"POST / HTTP/1.1\r\ntransfer-encoding: gzip\r\n\r\n").await;
        assert_eq!(request.unwrap_err().kind(), ErrorKind::UnknownContent);

        let (request, _) =
            parse_bytes(b"POST / HTTP/1.1\r\ncontent-length: 4096\r\n\r\n").await;
        let error = request.unwrap_err();
        assert_eq!(error.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(error.forces_close());

        let (request, _) = parse_bytes(
            b"POST / HTTP/1.1\r\ntransfer-encoding: chunked\r\n\r\n3\r\nabcd\r\n0\r\n\r\n",
        )
        .await;
        let error = request.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::ClientError);
        assert!(error.forces_close());
    }
}
