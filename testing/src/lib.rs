//! Helpers for integration-testing Hearth.
//!
//! Here, you can easily spin up a new server on a random non-used port
//! and send a request to it in under 5 lines.

#![deny(clippy::all, clippy::perf, clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]

use hearth::prelude::{networking::TcpStream, *};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

macro_rules! impl_methods {
    ($($method: ident $name: ident),*) => {
        $(
            /// Make a request to `path` with the selected method.
            ///
            /// Cookies are kept between requests made with these methods.
            pub fn $method(&self, path: impl AsRef<str>) -> reqwest::RequestBuilder {
                self.client.request(reqwest::Method::$name, self.url(path))
            }
        )*
    };
}

/// A port returned by [`ServerBuilder::run`] to connect to.
pub struct Server {
    server: Arc<shutdown::Manager>,
    certificate: Option<CertificateDer<'static>>,
    port: u16,
    client: reqwest::Client,
    // also update Debug implementation when adding fields
}
impl Server {
    impl_methods!(get GET, post POST, put PUT, delete DELETE, options OPTIONS);

    /// Get a [`reqwest::ClientBuilder`] with the [`Self::cert`] accepted.
    ///
    /// The client of the request methods is built from this, with a cookie store.
    pub fn client(&self) -> reqwest::ClientBuilder {
        Self::client_builder(self.cert())
    }
    fn client_builder(cert: Option<&CertificateDer<'static>>) -> reqwest::ClientBuilder {
        let mut client = reqwest::Client::builder();
        if let Some(cert) = cert {
            let cert = reqwest::Certificate::from_der(cert).unwrap();
            client = client.add_root_certificate(cert);
        }
        client
    }
    /// Builds a URL to the server with `path`.
    pub fn url(&self, path: impl AsRef<str>) -> reqwest::Url {
        let added_root = if path.as_ref().starts_with('/') {
            ""
        } else {
            "/"
        };
        let string = format!(
            "http{}://localhost:{}{}{}",
            self.cert().map_or("", |_| "s"),
            self.port(),
            added_root,
            path.as_ref()
        );
        reqwest::Url::parse(&string).unwrap()
    }
    /// Gets the port of the TCP server.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
    /// Gets the certificate, if any.
    /// This dictates whether or not HTTPS should be on.
    #[must_use]
    pub fn cert(&self) -> Option<&CertificateDer<'static>> {
        self.certificate.as_ref()
    }

    /// Opens a raw TCP connection to the server, to test what `reqwest` can't express.
    ///
    /// Only meaningful for servers started with [`ServerBuilder::http`].
    pub async fn connect(&self) -> TcpStream {
        TcpStream::connect(SocketAddr::new(
            IpAddr::V4(net::Ipv4Addr::LOCALHOST),
            self.port,
        ))
        .await
        .unwrap()
    }

    /// Gets a [`shutdown::Manager`] which is [`Send`].
    ///
    /// You can shut down Hearth from another thread using this.
    #[must_use]
    pub fn get_shutdown_manager(&self) -> Arc<shutdown::Manager> {
        Arc::clone(&self.server)
    }
}
impl Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Server")
            .field("server", &self.server)
            .field(
                "certificate",
                &self.certificate.as_ref().map(|_| "[internal certificate]"),
            )
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}
impl Drop for Server {
    fn drop(&mut self) {
        self.server.shutdown();
    }
}

/// A builder struct for starting a test [`Server`].
#[must_use = "run the server"]
pub struct ServerBuilder {
    https: bool,
    routes: Routes,
    hooks: Hooks,
    options: Options,
    store: Option<Box<dyn FnOnce(hearth::Server) -> hearth::Server>>,
}
impl ServerBuilder {
    /// Creates a new builder with `routes` and `options`,
    /// with HTTPS enabled. To disable this, call [`Self::http`].
    /// Use `Self::default()` for a default configuration.
    ///
    /// Also see the [`From`] implementations for this struct.
    ///
    /// The inner [`Routes`] can be modified with [`Self::with_routes`]
    /// and the [`Options`] with [`Self::with_options`]
    pub fn new(routes: Routes, options: Options) -> Self {
        let _ = env_logger::Builder::new()
            .parse_filters("rustls=warn,debug")
            .is_test(true)
            .parse_default_env()
            .try_init();
        Self {
            https: true,
            routes,
            hooks: Hooks::new(),
            options,
            store: None,
        }
    }
    /// Disables HTTPS.
    pub fn http(mut self) -> Self {
        self.https = false;
        self
    }
    /// Modifies the internal [`Routes`] with `mutation`.
    /// If you already have [`Routes`], use [`From`].
    pub fn with_routes(mut self, mutation: impl Fn(&mut Routes)) -> Self {
        mutation(&mut self.routes);
        self
    }
    /// Modifies the internal [`Options`] with `mutation`.
    /// If you already have [`Options`], use [`From`].
    pub fn with_options(mut self, mutation: impl Fn(&mut Options)) -> Self {
        mutation(&mut self.options);
        self
    }
    /// Sets the [`Hooks`].
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
    /// Persists sessions in `store` instead of a new [`MemoryStore`].
    pub fn with_store(mut self, store: impl SessionStore) -> Self {
        self.store = Some(Box::new(move |server| server.with_store(store)));
        self
    }

    async fn test_port_availability(port: u16) -> io::Result<()> {
        match TcpStream::connect(SocketAddr::new(IpAddr::V4(net::Ipv4Addr::LOCALHOST), port)).await
        {
            Err(e) => match e.kind() {
                io::ErrorKind::ConnectionRefused => Ok(()),
                _ => panic!("Spurious IO error while checking port availability: {e:?}"),
            },
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "Something is listening on the port!",
            )),
        }
    }
    async fn get_port() -> u16 {
        use rand::prelude::*;
        let mut rng = rand::rng();
        let port_range = rand::distr::Uniform::new(4096, 61440).unwrap();

        loop {
            let port = port_range.sample(&mut rng);

            if Self::test_port_availability(port).await.is_err() {
                continue;
            }
            return port;
        }
    }

    fn certificate() -> (CertificateDer<'static>, rustls::ServerConfig) {
        let self_signed_cert =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = self_signed_cert.cert.der().clone();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            self_signed_cert.key_pair.serialize_der(),
        ));

        let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![cert.clone()], key)
        .unwrap();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        (cert, config)
    }

    /// Starts a Hearth server with the current configuraion.
    ///
    /// The returned [`Server`] can make requests to the server, streamlining
    /// the process of testing Hearth.
    pub async fn run(self) -> Server {
        let Self {
            https,
            routes,
            hooks,
            options,
            store,
        } = self;

        let mut server = hearth::Server::new(routes)
            .with_hooks(hooks)
            .with_options(options);
        if let Some(store) = store {
            server = store(server);
        }
        let server = Arc::new(server);

        let (certificate, config) = if https {
            let (cert, config) = Self::certificate();
            (Some(cert), Some(Arc::new(config)))
        } else {
            (None, None)
        };

        loop {
            let port = Self::get_port().await;
            log::info!("Running on {port}");
            let port_descriptor = match &config {
                Some(config) => {
                    PortDescriptor::secure(port, Arc::clone(&server), Arc::clone(config))
                }
                None => PortDescriptor::new(port, Arc::clone(&server)),
            }
            .address(IpAddr::V4(net::Ipv4Addr::LOCALHOST));
            let run_config = RunConfig::new().bind(port_descriptor);

            // Last check for collisions
            if Self::test_port_availability(port).await.is_err() {
                continue;
            }
            let Ok(shutdown) = run_config.execute().await else {
                continue;
            };
            let client = Server::client_builder(certificate.as_ref())
                .cookie_store(true)
                .build()
                .unwrap();
            return Server {
                port,
                certificate,
                server: shutdown,
                client,
            };
        }
    }
}
impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new(Routes::default(), Options::default())
    }
}
impl From<Routes> for ServerBuilder {
    fn from(routes: Routes) -> Self {
        Self::new(routes, Options::default())
    }
}
impl From<Options> for ServerBuilder {
    fn from(options: Options) -> Self {
        Self::new(Routes::default(), options)
    }
}
impl From<(Routes, Options)> for ServerBuilder {
    fn from(data: (Routes, Options)) -> Self {
        Self::new(data.0, data.1)
    }
}

/// The testing prelude.
/// Also imports `hearth::prelude::*`.
pub mod prelude {
    pub use super::{Server, ServerBuilder};
    #[doc(hidden)]
    pub use hearth::prelude::*;
    pub use reqwest;
}
