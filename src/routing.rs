//! Routing of requests to handlers, and the fallbacks when no handler matches.
//!
//! Handlers are registered on exact paths (`/api/users`) or on wildcard prefixes
//! (`/api/*`). A request is routed to the exact path, else the longest matching
//! wildcard. If nothing matches, the [`Dispatcher`] tries, in order,
//! 1. the [`Hooks::static_request`] hook,
//! 2. the [`TemplateRenderer`],
//! 3. static files from the public directory, and
//! 4. a directory listing,
//!
//! and answers with `404 Not Found` if none of them gives a answer.

use crate::prelude::{internals::*, threading::*, *};
use crate::files::Files;
use crate::limiting::FirewallMode;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A boxed future, as returned by handlers.
pub type RetFut<T> = Pin<Box<dyn Future<Output = T> + Send>>;
/// A request handler.
pub type Handler = Arc<dyn Fn(Context) -> RetFut<Result<Reply, Error>> + Send + Sync>;

/// Makes a [`Handler`] of a async function or closure.
///
/// ```
/// # use hearth::prelude::*;
/// let hello = routing::handler(|ctx: Context| async move {
///     let name: String = ctx.request().parameter("name")?;
///     let mut result = ResultBuilder::new();
///     result.add_success(format_compact!("Hello, {name}!"));
///     Ok::<_, Error>(Reply::from(result))
/// });
/// ```
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, Error>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// What a handler answers with.
#[derive(Debug)]
pub enum Reply {
    /// A result to render in the format the client asked for.
    Result(ResultBuilder),
    /// A finished answer.
    Answer(Answer),
}
impl From<ResultBuilder> for Reply {
    fn from(result: ResultBuilder) -> Self {
        Self::Result(result)
    }
}
impl From<Answer> for Reply {
    fn from(answer: Answer) -> Self {
        Self::Answer(answer)
    }
}

/// What a session must have to access a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    /// Anyone.
    #[default]
    Public,
    /// A persisted session.
    Session,
    /// A authenticated session.
    Authenticated,
    /// A authenticated session with all of these flags.
    Flags(u64),
}
impl Access {
    /// Checks if `session` may access the route.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::SessionRequired`], [`ErrorKind::AuthenticationRequired`] or
    /// [`ErrorKind::MissingRights`] for the respective requirement.
    pub fn check(self, session: &Session) -> Result<(), Error> {
        match self {
            Self::Public => Ok(()),
            Self::Session if !session.is_persisted() => {
                Err(Error::session_required("a session is required"))
            }
            Self::Authenticated | Self::Flags(_) if !session.is_authenticated() => Err(
                Error::authentication_required("authentication is required"),
            ),
            Self::Flags(mask) if !session.has_flags(mask) => {
                Err(Error::missing_rights("the session lacks the required rights"))
            }
            Self::Session | Self::Authenticated | Self::Flags(_) => Ok(()),
        }
    }
}

/// A handler and it's access requirement.
#[derive(Clone)]
pub struct Route {
    handler: Handler,
    access: Access,
}
impl Route {
    /// Creates a route to `handler`, requiring `access`.
    pub fn new(handler: Handler, access: Access) -> Self {
        Self { handler, access }
    }
    /// A route anyone can access.
    pub fn public(handler: Handler) -> Self {
        Self::new(handler, Access::Public)
    }
    /// The access requirement.
    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }
}
impl Debug for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("handler", &"[internal handler]")
            .field("access", &self.access)
            .finish()
    }
}

/// The route table.
#[derive(Debug, Default, Clone)]
#[must_use]
pub struct Routes {
    routes: HashMap<CompactString, Route>,
}
impl Routes {
    /// Creates a empty route table.
    pub fn new() -> Self {
        Self::default()
    }
    /// Adds `route` at `path`. A `path` ending in `/*` matches all paths below it.
    ///
    /// Replaces any route previously at `path`.
    pub fn add(&mut self, path: impl Into<CompactString>, route: Route) -> &mut Self {
        let path = path.into();
        if self.routes.insert(path.clone(), route).is_some() {
            warn!("Route {path} was added twice, the last one is used.");
        }
        self
    }
    /// Finds the route of `path`.
    ///
    /// An exact match is preferred. Then, the last segment of `path` is removed until
    /// `<prefix>/*` matches, down to `/*`.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        if let Some(route) = self.routes.get(path) {
            return Some(route);
        }
        let mut prefix = path;
        let mut key = CompactString::default();
        while let Some(slash) = prefix.rfind('/') {
            prefix = &prefix[..slash];
            key.clear();
            key.push_str(prefix);
            key.push_str("/*");
            if let Some(route) = self.routes.get(&key) {
                return Some(route);
            }
        }
        None
    }
    /// The number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }
    /// If no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Renders templates for paths without a route.
pub trait TemplateRenderer: Send + Sync {
    /// Renders the template of `request`, if any.
    ///
    /// # Errors
    ///
    /// Errors are answered like handler errors.
    fn render(&self, request: &Request) -> Option<Result<Answer, Error>>;
}

/// Called with requests without a route, before anything else is tried.
pub type StaticRequestHook = Arc<dyn Fn(&Request) -> Option<Answer> + Send + Sync>;
/// Called with the headers of every answer before it's written.
pub type AugmentHeadersHook = Arc<dyn Fn(&Request, &mut HeaderMap) + Send + Sync>;

/// Hooks into the handling of requests.
#[derive(Clone, Default)]
#[must_use]
pub struct Hooks {
    /// See [`StaticRequestHook`].
    pub static_request: Option<StaticRequestHook>,
    /// See [`AugmentHeadersHook`].
    pub augment_headers: Option<AugmentHeadersHook>,
}
impl Hooks {
    /// No hooks.
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets the [`StaticRequestHook`].
    pub fn static_request(
        mut self,
        hook: impl Fn(&Request) -> Option<Answer> + Send + Sync + 'static,
    ) -> Self {
        self.static_request = Some(Arc::new(hook));
        self
    }
    /// Sets the [`AugmentHeadersHook`].
    pub fn augment_headers(
        mut self,
        hook: impl Fn(&Request, &mut HeaderMap) + Send + Sync + 'static,
    ) -> Self {
        self.augment_headers = Some(Arc::new(hook));
        self
    }
}
impl Debug for Hooks {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("static_request", &self.static_request.is_some())
            .field("augment_headers", &self.augment_headers.is_some())
            .finish()
    }
}

/// Everything a handler gets.
#[derive(Debug, Clone)]
pub struct Context {
    request: Arc<Request>,
    session: Arc<Mutex<Session>>,
    sessions: Arc<Sessions>,
    server: Arc<Server>,
}
impl Context {
    /// The request.
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.request
    }
    /// The server's options.
    #[must_use]
    pub fn options(&self) -> &Options {
        self.server.options()
    }
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
    /// A copy of the session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.lock().clone()
    }
    /// Authenticates `principal` with `flags` on the session.
    ///
    /// # Errors
    ///
    /// See [`Sessions::authenticate`].
    pub fn authenticate(&self, principal: i64, flags: u64) -> Result<(), Error> {
        self.sessions.authenticate(&mut self.lock(), principal, flags)
    }
    /// Logs out of the session.
    ///
    /// # Errors
    ///
    /// See [`Sessions::logout`].
    pub fn logout(&self) -> Result<(), Error> {
        self.sessions.logout(&mut self.lock())
    }
}

/// Routes requests of a [`Server`] and runs the handlers.
#[derive(Debug)]
pub struct Dispatcher {
    server: Arc<Server>,
    sessions: Arc<Sessions>,
    firewall: Arc<Firewall>,
    files: Option<Files>,
}
impl Dispatcher {
    /// Creates the dispatcher of `server`, starting it's session writer and firewall sweeper.
    ///
    /// Has to be called from within a Tokio runtime.
    #[must_use]
    pub fn new(server: Arc<Server>) -> Self {
        let options = server.options();
        let sessions = Sessions::start(
            Arc::clone(server.store()),
            options.session_mode,
            options.source_check,
            options.session_lifetime,
        );
        let firewall = Firewall::start(options.firewall_mode);
        let files = options.public_dir.as_ref().map(|dir| {
            Files::new(dir, options.file_cache_lifetime, options.directory_listing)
        });
        Self {
            server,
            sessions,
            firewall,
            files,
        }
    }
    /// The server.
    #[must_use]
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }
    /// The session manager.
    #[must_use]
    pub fn sessions(&self) -> &Arc<Sessions> {
        &self.sessions
    }
    /// The firewall.
    #[must_use]
    pub fn firewall(&self) -> &Arc<Firewall> {
        &self.firewall
    }
    /// If the firewall rejects requests.
    #[must_use]
    pub fn enforcing(&self) -> bool {
        self.firewall.mode() == FirewallMode::Enforce
    }

    /// Creates the [`Context`] of `request` in `session`.
    #[must_use]
    pub fn context(&self, request: Request, session: Session) -> Context {
        Context {
            request: Arc::new(request),
            session: Arc::new(Mutex::new(session)),
            sessions: Arc::clone(&self.sessions),
            server: Arc::clone(&self.server),
        }
    }

    /// Routes the request of `context` and produces the reply.
    ///
    /// `OPTIONS` requests are answered right away. Routed handlers run on their own task.
    /// A panic in a handler, the static request hook or the template renderer is reported
    /// as a [`ErrorKind::InternalServerError`].
    ///
    /// # Errors
    ///
    /// Returns the errors of the access check and the handler, and
    /// [`ErrorKind::NotFound`] if nothing answers.
    pub async fn dispatch(&self, context: Context) -> Result<Reply, Error> {
        let request = Arc::clone(&context.request);
        if request.method() == Method::OPTIONS {
            let mut result = ResultBuilder::new();
            result
                .add_success("options")
                .add_header(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
            return Ok(result.into());
        }

        if let Some(route) = self.server.routes().resolve(request.path()) {
            route.access().check(&context.session())?;
            let handler = Arc::clone(&route.handler);
            return match spawn(handler(context)).await {
                Ok(reply) => reply,
                Err(err) if err.is_panic() => Err(Error::internal(format_compact!(
                    "handler of {} panicked",
                    request.path()
                ))),
                Err(err) => Err(Error::internal(format_compact!(
                    "handler of {} was cancelled: {err}",
                    request.path()
                ))),
            };
        }

        self.fallback(&request).await
    }

    async fn fallback(&self, request: &Request) -> Result<Reply, Error> {
        if let Some(hook) = &self.server.hooks().static_request {
            if let Some(answer) = guarded("static request hook", || hook(request))? {
                return Ok(answer.into());
            }
        }
        if let Some(templates) = self.server.templates() {
            if let Some(answer) = guarded("template renderer", || templates.render(request))? {
                return answer.map(Reply::from);
            }
        }
        if let Some(files) = &self.files {
            if let Some(answer) = files.serve(request).await? {
                return Ok(answer.into());
            }
        }
        Err(Error::not_found(format_compact!(
            "nothing at {}",
            request.path()
        )))
    }
}

/// Calls the hook or renderer `f`, turning a panic into a
/// [`ErrorKind::InternalServerError`] naming `what`.
pub(crate) fn guarded<T>(what: &str, f: impl FnOnce() -> T) -> Result<T, Error> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|_| Error::internal(format_compact!("{what} panicked")))
}

/// The methods Hearth accepts.
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";
