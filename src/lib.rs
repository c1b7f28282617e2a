//! An embeddable HTTP/1.1 server engine.
//!
//! Hearth accepts connections, parses requests into a [`Request`] (query, form and
//! multipart parameters included), resolves a [`Session`], consults an abuse guard
//! and dispatches to a [`Route`] keyed by the request path.
//! Handlers fill a [`ResultBuilder`] with tables and a status message, which is
//! rendered as HTML, JSON, XML or plain text from the extension of the path.
//!
//! # Example
//!
//! ```no_run
//! use hearth::prelude::*;
//!
//! # async fn example() {
//! let mut routes = Routes::new();
//! routes.add(
//!     "/hello",
//!     Route::public(routing::handler(|_context| async {
//!         let mut result = ResultBuilder::new();
//!         result.add_success("hello");
//!         Ok::<_, Error>(Reply::from(result))
//!     })),
//! );
//! let server = Arc::new(Server::new(routes));
//!
//! let manager = RunConfig::new()
//!     .bind(PortDescriptor::new(8080, server))
//!     .execute()
//!     .await
//!     .unwrap();
//! manager.wait().await;
//! # }
//! ```
#![deny(
    unreachable_pub,
    missing_debug_implementations,
    missing_docs,
    clippy::pedantic
)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines
)]

pub mod answer;
pub mod connection;
pub mod encryption;
pub mod error;
pub mod files;
pub mod limiting;
pub mod prelude;
pub mod render;
pub mod request;
pub mod result;
pub mod routing;
pub mod session;
pub mod shutdown;

use prelude::{internals::*, networking::*, threading::*, *};
use routing::TemplateRenderer;

pub use error::{Error, ErrorKind};
pub use routing::{Context, Route, Routes};

/// The default `server` header.
pub const SERVER_NAME: &str = "hearth";

/// The tunables of a [`Server`].
///
/// All fields are public; start from [`Options::default`] and change what you need.
#[derive(Debug, Clone)]
#[must_use]
pub struct Options {
    /// The value of the `server` header and the title of HTML pages.
    pub server_name: CompactString,
    /// The `content-language` of answers which don't set one.
    pub content_language: CompactString,
    /// Never gzip answers.
    pub disable_compression: bool,
    /// Where the session id is given to the client.
    pub session_mode: SessionMode,
    /// How strictly a session is bound to the address which created it.
    pub source_check: SourceCheck,
    /// How long a persisted session lives.
    pub session_lifetime: Duration,
    /// If the abuse guard rejects requests or only keeps count.
    pub firewall_mode: limiting::FirewallMode,
    /// Include the field names of tables in JSON and XML.
    pub transmit_layout: bool,
    /// The directory static files are served from. [`None`] disables static files.
    pub public_dir: Option<PathBuf>,
    /// List directories without a `index.html`.
    pub directory_listing: bool,
    /// How long clients may cache static files.
    pub file_cache_lifetime: Duration,
    /// How long a connection may idle between requests and between reads.
    pub keep_alive_timeout: Duration,
    /// How long the rest of the input is drained after the last answer, before closing.
    pub drain_timeout: Duration,
    /// The maximum length of a request body.
    pub max_body_length: usize,
    /// The value of `access-control-allow-origin`. [`None`] doesn't send any CORS headers.
    pub cors: Option<CompactString>,
}
impl Default for Options {
    fn default() -> Self {
        Self {
            server_name: CompactString::new(SERVER_NAME),
            content_language: CompactString::new("en"),
            disable_compression: false,
            session_mode: SessionMode::default(),
            source_check: SourceCheck::default(),
            session_lifetime: Duration::from_secs(60 * 60),
            firewall_mode: limiting::FirewallMode::default(),
            transmit_layout: false,
            public_dir: None,
            directory_listing: false,
            file_cache_lifetime: Duration::from_secs(60 * 60),
            keep_alive_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(2),
            max_body_length: 64 * 1024 * 1024,
            cors: None,
        }
    }
}

/// Everything one site consists of: the routes, hooks, templates, the session store and [`Options`].
///
/// Bind it to one or more ports with [`PortDescriptor`]s.
/// Ports sharing a `Arc<Server>` share sessions and the abuse guard.
#[must_use]
pub struct Server {
    routes: Routes,
    hooks: Hooks,
    templates: Option<Arc<dyn TemplateRenderer>>,
    store: Arc<dyn SessionStore>,
    options: Options,
}
impl Server {
    /// Creates a server with `routes`, sessions kept in a [`MemoryStore`] and default [`Options`].
    pub fn new(routes: Routes) -> Self {
        Self {
            routes,
            hooks: Hooks::new(),
            templates: None,
            store: Arc::new(MemoryStore::new()),
            options: Options::default(),
        }
    }
    /// Sets the hooks.
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
    /// Sets the renderer tried for paths without a route.
    pub fn with_templates(mut self, templates: impl TemplateRenderer + 'static) -> Self {
        self.templates = Some(Arc::new(templates));
        self
    }
    /// Persists sessions in `store`.
    pub fn with_store(mut self, store: impl SessionStore) -> Self {
        self.store = Arc::new(store);
        self
    }
    /// Sets the options.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// The routes.
    #[must_use]
    pub fn routes(&self) -> &Routes {
        &self.routes
    }
    /// The hooks.
    #[must_use]
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }
    /// The template renderer, if any.
    #[must_use]
    pub fn templates(&self) -> Option<&Arc<dyn TemplateRenderer>> {
        self.templates.as_ref()
    }
    /// The session store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
    /// The options.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }
}
impl Debug for Server {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("routes", &self.routes)
            .field("hooks", &self.hooks)
            .field("templates", &self.templates.as_ref().map(|_| "TemplateRenderer"))
            .field("store", &self.store)
            .field("options", &self.options)
            .finish()
    }
}

/// A port to listen on, the [`Server`] behind it and optionally the TLS config.
#[derive(Debug, Clone)]
#[must_use]
pub struct PortDescriptor {
    port: u16,
    address: IpAddr,
    server: Arc<Server>,
    #[cfg(feature = "https")]
    tls: Option<Arc<rustls::ServerConfig>>,
}
impl PortDescriptor {
    /// Serves `server` unencrypted on `port` on all IPv4 interfaces.
    pub fn new(port: u16, server: Arc<Server>) -> Self {
        Self {
            port,
            address: IpAddr::V4(net::Ipv4Addr::UNSPECIFIED),
            server,
            #[cfg(feature = "https")]
            tls: None,
        }
    }
    /// Serves `server` on `port`, encrypted with `config`.
    ///
    /// See [`encryption::server_config`].
    #[cfg(feature = "https")]
    pub fn secure(port: u16, server: Arc<Server>, config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            tls: Some(config),
            ..Self::new(port, server)
        }
    }
    /// Listens on `address` instead of all IPv4 interfaces.
    pub fn address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    /// The port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }
    /// The server.
    #[must_use]
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }
    /// The TLS config, if this port is encrypted.
    #[cfg(feature = "https")]
    #[must_use]
    pub fn tls(&self) -> Option<&Arc<rustls::ServerConfig>> {
        self.tls.as_ref()
    }
    /// If this port is encrypted.
    #[must_use]
    pub fn is_secure(&self) -> bool {
        #[cfg(feature = "https")]
        {
            self.tls.is_some()
        }
        #[cfg(not(feature = "https"))]
        {
            false
        }
    }
}

/// The ports to run.
///
/// Call [`RunConfig::execute`] to start listening.
#[derive(Debug, Default)]
#[must_use]
pub struct RunConfig {
    ports: Vec<PortDescriptor>,
}
impl RunConfig {
    /// Creates a config without any ports.
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds a port.
    pub fn bind(mut self, port: PortDescriptor) -> Self {
        self.ports.push(port);
        self
    }

    /// Binds all ports and starts accepting connections.
    ///
    /// Returns when all ports are bound. The returned [`shutdown::Manager`] is used to
    /// [shut down](shutdown::Manager::shutdown) and to [wait](shutdown::Manager::wait) for it.
    ///
    /// # Errors
    ///
    /// Returns the error of binding a port. No port is served then.
    pub async fn execute(self) -> io::Result<Arc<shutdown::Manager>> {
        let manager = shutdown::Manager::new().build();

        let mut dispatchers: Vec<Arc<Dispatcher>> = Vec::new();
        let mut listeners = Vec::with_capacity(self.ports.len());
        for descriptor in self.ports {
            let dispatcher = if let Some(dispatcher) = dispatchers
                .iter()
                .find(|dispatcher| Arc::ptr_eq(dispatcher.server(), &descriptor.server))
            {
                Arc::clone(dispatcher)
            } else {
                let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&descriptor.server)));
                dispatchers.push(Arc::clone(&dispatcher));
                dispatcher
            };

            let listener =
                TcpListener::bind(SocketAddr::new(descriptor.address, descriptor.port)).await?;
            info!(
                "Listening on {} ({})",
                listener.local_addr()?,
                if descriptor.is_secure() {
                    "https"
                } else {
                    "http"
                }
            );
            listeners.push((manager.add_listener(listener), descriptor, dispatcher));
        }

        for (listener, descriptor, dispatcher) in listeners {
            spawn(accept(
                listener,
                Arc::new(descriptor),
                dispatcher,
                Arc::clone(&manager),
            ));
        }
        Ok(manager)
    }
}

async fn accept(
    mut listener: shutdown::AcceptManager,
    descriptor: Arc<PortDescriptor>,
    dispatcher: Arc<Dispatcher>,
    manager: Arc<shutdown::Manager>,
) {
    loop {
        match listener.accept().await {
            shutdown::AcceptAction::Shutdown => {
                debug!("Closing listener on port {}", descriptor.port);
                return;
            }
            shutdown::AcceptAction::Accept(Err(err)) => {
                // e.g. too many open files; back off a little
                warn!("Failed to accept connection: {err}");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            shutdown::AcceptAction::Accept(Ok((stream, address))) => {
                let descriptor = Arc::clone(&descriptor);
                let dispatcher = Arc::clone(&dispatcher);
                let manager = Arc::clone(&manager);
                let guard = manager.connection();
                spawn(async move {
                    let _guard = guard;
                    connection::handle(stream, address, &descriptor, &dispatcher, &manager).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = Options::default();
        assert_eq!(options.server_name, "hearth");
        assert_eq!(options.session_mode, SessionMode::Cookie);
        assert_eq!(options.firewall_mode, limiting::FirewallMode::Observe);
        assert!(options.public_dir.is_none());
        assert!(options.cors.is_none());

        let descriptor = PortDescriptor::new(0, Arc::new(Server::new(Routes::new())));
        assert!(!descriptor.is_secure());
    }

    #[tokio::test]
    async fn binding() {
        let server = Arc::new(Server::new(Routes::new()));
        let manager = RunConfig::new()
            .bind(
                PortDescriptor::new(0, Arc::clone(&server))
                    .address(IpAddr::V4(net::Ipv4Addr::LOCALHOST)),
            )
            .execute()
            .await
            .unwrap();
        assert!(!manager.get_shutdown());
        manager.shutdown();
        manager.wait().await;
    }
}
