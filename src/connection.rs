//! The life of a single connection.
//!
//! [`handle`] performs the optional TLS handshake, then reads, dispatches and answers
//! requests one after another until keep-alive ends, the client goes away or the
//! server shuts down.
use crate::prelude::{internals::*, networking::*, *};
use async_bits::{read, write};
use limiting::Verdict;
use rand::Rng;
use routing::Reply;

/// Handles the connection `stream` from `address` on the port of `descriptor`.
///
/// Never fails; errors are answered when there's someone to answer and logged otherwise.
pub async fn handle(
    stream: TcpStream,
    address: SocketAddr,
    descriptor: &PortDescriptor,
    dispatcher: &Dispatcher,
    manager: &shutdown::Manager,
) {
    let options = dispatcher.server().options();

    #[cfg(feature = "https")]
    let encrypted = match Encryption::new_tcp(stream, descriptor.tls().cloned()).await {
        Ok(encrypted) => encrypted,
        Err(encryption::Error::Handshake(err, stream)) => {
            info!("TLS handshake with {address} failed: {err}");
            not_supported(stream, options).await;
            return;
        }
        Err(encryption::Error::Io(err)) => {
            debug!("Connection with {address} failed before handshake: {err}");
            return;
        }
    };
    #[cfg(not(feature = "https"))]
    let encrypted = Encryption::new_tcp(stream);

    debug!(
        "Accepted {} connection from {address}",
        if encrypted.is_secure() {
            "encrypted"
        } else {
            "plain"
        }
    );

    let mut reader = Reader::new(encrypted).with_timeout(options.keep_alive_timeout);
    serve(&mut reader, address, descriptor.port(), dispatcher, manager).await;

    let mut stream = reader.into_inner();
    let drained = tokio::time::timeout(options.drain_timeout, drain(&mut stream)).await;
    if drained.is_err() {
        debug!("Gave up draining {address}");
    }
    debug!("Closed connection with {address}");
}

/// Writes the fixed answer for plain text on a encrypted port.
#[cfg(feature = "https")]
async fn not_supported(mut stream: TcpStream, options: &Options) {
    let answer = Answer::hardcoded(
        StatusCode::BAD_REQUEST,
        Some("HTTP not supported. Use HTTPS on this port."),
    );
    let (response, body) = answer.into_response(
        Version::HTTP_11,
        &options.server_name,
        &options.content_language,
        true,
    );
    if let Err(err) = write::response(&response, &body, &mut stream).await {
        debug!("Failed to answer plain request: {err}");
    }
    let _ = tokio::time::timeout(options.drain_timeout, drain(&mut stream)).await;
}

/// Shuts down the write half and reads till the client closes.
async fn drain(stream: &mut (impl AsyncRead + AsyncWrite + Unpin)) -> io::Result<()> {
    stream.shutdown().await?;
    let mut buffer = [0; 1024];
    while stream.read(&mut buffer).await? != 0 {}
    Ok(())
}

/// The request loop.
async fn serve(
    reader: &mut Reader<Encryption>,
    address: SocketAddr,
    local_port: u16,
    dispatcher: &Dispatcher,
    manager: &shutdown::Manager,
) {
    let options = dispatcher.server().options();
    loop {
        let head = tokio::select! {
            head = read::head(reader, read::MAX_HEADERS) => head,
            () = manager.signal() => {
                debug!("Shutting down idle connection with {address}");
                return;
            }
        };
        let head = match head {
            Ok(Some(head)) => head,
            Ok(None) => return,
            Err(err) => {
                let error = Error::from(err);
                if !error.is_disconnect() {
                    // we don't know what the client wants; answer in HTML
                    let answer = error_answer(&error, Format::Html, "/", options);
                    write_answer(reader, answer, Version::HTTP_11, true, options).await;
                    dispatcher.firewall().record(address.ip(), true);
                }
                return;
            }
        };

        let version = head.version;
        let (path, _) = parse::split_target(&head.target);
        let decoded = parse::path(path);
        let format = Format::from_extension(decoded.extension.as_deref());

        let request = match request::parse(
            reader,
            head,
            address,
            local_port,
            options.max_body_length,
        )
        .await
        {
            Ok(request) => request,
            Err(error) => {
                if error.is_disconnect() {
                    return;
                }
                let close = error.forces_close();
                let answer = error_answer(&error, format, &decoded.path, options);
                let written = write_answer(reader, answer, version, close, options).await;
                dispatcher.firewall().record(address.ip(), true);
                if written && !close && !manager.get_shutdown() {
                    continue;
                }
                return;
            }
        };

        let keep_alive = request.keep_alive();
        let accepts_gzip = request.accepts_gzip();
        trace!(
            "{} {} from {address}",
            request.method(),
            request.path()
        );

        let session = dispatcher.sessions().resolve(&request).await;
        let verdict = dispatcher.firewall().check(address.ip());
        let context = dispatcher.context(request, session);
        let request = context.request();

        let mut answer = match verdict {
            Verdict::Reject(wait) => {
                let error = Error::too_fast(format_compact!(
                    "retry in {} ms",
                    wait.as_millis()
                ));
                let seconds = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
                error_answer(&error, format, request.path(), options).with_header(
                    header::RETRY_AFTER,
                    HeaderValue::from(seconds),
                )
            }
            Verdict::Pass(waiter) => {
                let reply = dispatcher.dispatch(context.clone()).await;
                drop(waiter);
                match reply {
                    Ok(Reply::Result(result)) => {
                        result_answer(result, format, request.path(), options)
                    }
                    Ok(Reply::Answer(answer)) => answer,
                    Err(error) => error_answer(&error, format, request.path(), options),
                }
            }
        };

        dispatcher
            .sessions()
            .add_headers(&context.session(), answer.headers_mut());
        if let Some(origin) = &options.cors {
            add_cors(answer.headers_mut(), origin);
        }
        if let Some(hook) = &dispatcher.server().hooks().augment_headers {
            let headers = answer.headers_mut();
            let augmented = routing::guarded("augment headers hook", || hook(request, headers));
            if let Err(error) = augmented {
                answer = error_answer(&error, format, request.path(), options);
            }
        }

        let error = answer.status().as_u16() >= 400;
        let close = !keep_alive || answer.close() || manager.get_shutdown();
        answer.compress(accepts_gzip, options.disable_compression);
        let written = write_answer(reader, answer, version, close, options).await;
        dispatcher.firewall().record(address.ip(), error);

        if !written || close {
            return;
        }
    }
}

/// Writes `answer` and returns whether it succeeded.
async fn write_answer(
    reader: &mut Reader<Encryption>,
    answer: Answer,
    version: Version,
    close: bool,
    options: &Options,
) -> bool {
    let status = answer.status();
    let (response, body) = answer.into_response(
        version,
        &options.server_name,
        &options.content_language,
        close,
    );
    let mut writer = tokio::io::BufWriter::new(reader.get_mut());
    match write::response(&response, &body, &mut writer).await {
        Ok(()) => {
            trace!("Answered {}", status.as_u16());
            true
        }
        Err(err) => {
            debug!("Failed to write answer: {err}");
            false
        }
    }
}

fn result_answer(
    mut result: ResultBuilder,
    format: Format,
    path: &str,
    options: &Options,
) -> Answer {
    let content = render::render(
        &result,
        format,
        path,
        &options.server_name,
        options.transmit_layout,
    );
    let mut answer = Answer::formatted(result.status(), content, format);
    answer.merge_headers(result.take_headers());
    answer
}

/// A random hex token to correlate what the client sees with the log.
#[must_use]
pub fn support_code() -> CompactString {
    format_compact!("{:08x}", rand::thread_rng().gen::<u32>())
}

/// Converts `error` to an answer in `format`.
///
/// Internal errors are logged with a [`support_code`] which replaces the message.
/// `401` answers get a `www-authenticate` header.
#[must_use]
pub fn error_answer(error: &Error, format: Format, path: &str, options: &Options) -> Answer {
    let mut result = ResultBuilder::new();
    if error.kind() == ErrorKind::InternalServerError {
        let code = support_code();
        error!("Internal error at {path} (support code {code}): {error}");
        result.add_message(
            error.status(),
            error.kind(),
            format_compact!("An internal error occurred. Support code: {code}"),
        );
    } else {
        debug!("Answering error at {path}: {error}");
        result.add_error(error);
    }
    let mut answer = result_answer(result, format, path, options);
    if error.forces_close() {
        answer.set_close();
    }
    if error.status() == StatusCode::UNAUTHORIZED {
        let challenge = format!("Session realm=\"{}\"", options.server_name.replace('"', ""));
        if let Ok(value) = HeaderValue::try_from(challenge) {
            answer.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
    }
    answer
}

fn add_cors(headers: &mut HeaderMap, origin: &str) {
    if let Ok(origin) = HeaderValue::from_str(origin) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("content-type, session"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("session"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(routing::ALLOWED_METHODS),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors() {
        let options = Options::default();
        let answer = error_answer(
            &Error::internal("database is on fire"),
            Format::Plain,
            "/x",
            &options,
        );
        assert_eq!(answer.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(answer.close());
        let text = str::from_utf8(answer.content()).unwrap();
        assert!(text.contains("Support code"));
        assert!(!text.contains("fire"));
    }

    #[test]
    fn authentication_challenge() {
        let options = Options::default();
        let answer = error_answer(
            &Error::authentication_required("log in"),
            Format::Json,
            "/admin",
            &options,
        );
        assert_eq!(answer.status(), StatusCode::UNAUTHORIZED);
        assert!(!answer.close());
        assert_eq!(
            answer.headers().get("www-authenticate").unwrap(),
            "Session realm=\"hearth\""
        );
        assert_eq!(answer.content_type(), "application/json");
    }

    #[test]
    fn support_codes() {
        let code = support_code();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cors() {
        let mut headers = HeaderMap::new();
        add_cors(&mut headers, "https://example.org");
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "https://example.org"
        );
        assert_eq!(headers.get("access-control-expose-headers").unwrap(), "session");
    }
}
