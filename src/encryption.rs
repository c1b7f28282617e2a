//! Encryption for incoming traffic, implemented through streams.
//!
//! Based on [`rustls`] through `tokio-rustls`. [`Encryption`] implements both
//! [`AsyncRead`] and [`AsyncWrite`], so the connection reads the same way from
//! plain and encrypted streams.
use crate::prelude::{networking::*, *};
use std::task::{Context, Poll};
use tokio::io::ReadBuf;

#[cfg(feature = "https")]
use rustls::ServerConfig;
#[cfg(feature = "https")]
use tokio_rustls::{server::TlsStream, TlsAcceptor};

/// A possibly encrypted stream.
#[derive(Debug)]
pub enum Encryption {
    /// A TLS encrypted TCP stream.
    #[cfg(feature = "https")]
    TcpTls(Box<TlsStream<TcpStream>>),
    /// A unencrypted TCP stream for use with
    /// non-secure HTTP.
    Tcp(TcpStream),
}
impl Encryption {
    /// Creates a new [`Encryption`] from a `tcp` connection.
    ///
    /// # Errors
    ///
    /// Will return an error if the TLS handshake failed, if `certificate.is_some()`.
    /// [`Error::Handshake`] gives the stream back, to answer in plain text.
    #[cfg(feature = "https")]
    pub async fn new_tcp(
        stream: TcpStream,
        certificate: Option<Arc<ServerConfig>>,
    ) -> Result<Self, Error> {
        match certificate {
            None => Ok(Self::Tcp(stream)),
            Some(config) => {
                debug!("Trying to handshake");
                let stream = TlsAcceptor::from(config)
                    .accept(stream)
                    .into_fallible()
                    .await
                    .map_err(|(err, stream)| Error::Handshake(err, stream))?;
                debug!("Successful handshake");
                Ok(Self::TcpTls(Box::new(stream)))
            }
        }
    }
    /// Creates a new unencrypted stream from a [`TcpStream`].
    #[cfg(not(feature = "https"))]
    pub fn new_tcp(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }

    /// If the stream is encrypted.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        match self {
            #[cfg(feature = "https")]
            Self::TcpTls(_) => true,
            Self::Tcp(_) => false,
        }
    }
}
impl AsyncRead for Encryption {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "https")]
            Self::TcpTls(tls) => Pin::new(tls.as_mut()).poll_read(cx, buf),
        }
    }
}
impl AsyncWrite for Encryption {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "https")]
            Self::TcpTls(tls) => Pin::new(tls.as_mut()).poll_write(cx, buf),
        }
    }
    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "https")]
            Self::TcpTls(tls) => Pin::new(tls.as_mut()).poll_flush(cx),
        }
    }
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match self.get_mut() {
            Self::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "https")]
            Self::TcpTls(tls) => Pin::new(tls.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Generic encryption error.
#[derive(Debug)]
pub enum Error {
    /// An IO error occurred during operation.
    Io(io::Error),
    /// The TLS handshake failed. The plain stream is given back.
    Handshake(io::Error, TcpStream),
}
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => {
                f.write_str("std::Io: ")?;
                Display::fmt(e, f)
            }
            Self::Handshake(e, _) => {
                f.write_str("TLS handshake: ")?;
                Display::fmt(e, f)
            }
        }
    }
}
impl std::error::Error for Error {}

/// An error from [`server_config`].
#[derive(Debug)]
pub enum ConfigError {
    /// A file couldn't be read.
    Io(io::Error),
    /// The certificate file contains no certificates.
    NoCertificate,
    /// The key file contains no private key.
    NoKey,
    /// The certificate and key were rejected.
    #[cfg(feature = "https")]
    Tls(rustls::Error),
}
impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
#[cfg(feature = "https")]
impl From<rustls::Error> for ConfigError {
    fn from(err: rustls::Error) -> Self {
        Self::Tls(err)
    }
}
impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read: {err}"),
            Self::NoCertificate => f.write_str("no certificate found"),
            Self::NoKey => f.write_str("no private key found"),
            #[cfg(feature = "https")]
            Self::Tls(err) => write!(f, "rustls::Error: {err}"),
        }
    }
}
impl std::error::Error for ConfigError {}

/// Creates a [`ServerConfig`] of the PEM certificate chain at `cert_path`
/// and the PEM private key at `key_path`.
///
/// Uses the `ring` crypto provider and advertises `http/1.1` through ALPN.
///
/// # Errors
///
/// See [`ConfigError`].
#[cfg(feature = "https")]
pub fn server_config(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<ServerConfig, ConfigError> {
    let mut chain = io::BufReader::new(std::fs::File::open(cert_path)?);
    let mut key = io::BufReader::new(std::fs::File::open(key_path)?);

    let chain = rustls_pemfile::certs(&mut chain).collect::<Result<Vec<_>, _>>()?;
    if chain.is_empty() {
        return Err(ConfigError::NoCertificate);
    }
    let key = rustls_pemfile::private_key(&mut key)?.ok_or(ConfigError::NoKey)?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(chain, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}
