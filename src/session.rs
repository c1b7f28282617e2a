//! Sessions: resolution from the `session` header or `Session` cookie,
//! authentication, expiry and persistence.
//!
//! The records live in a [`SessionStore`]. [`MemoryStore`] is the bundled implementation;
//! other stores (e.g. a database) implement the same trait.
//!
//! Writes on the success path (extending the expiration, deleting and sweeping expired
//! sessions) go through a bounded queue drained by a single background task, so they
//! never block a response. If the queue is full, the write is dropped with a warning.
//! Lookups and inserts in stores which aren't in memory run on the blocking thread pool.

use crate::prelude::{threading::*, *};
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::AtomicI64;
use time::OffsetDateTime;
use tokio::sync::mpsc;

/// The name of the session cookie.
pub const COOKIE: &str = "Session";
/// The name of the session header.
pub const HEADER: &str = "session";
/// Expired sessions are swept at most this often.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// The capacity of the queue of background writes.
pub const QUEUE_CAPACITY: usize = 1024;
const MAX_ID_ATTEMPTS: usize = 16;

/// How the session id is transported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// No sessions are persisted. Every request gets a ephemeral session with id 0.
    None,
    /// Through the `Session` cookie.
    #[default]
    Cookie,
    /// Through the `session` header.
    Header,
}

/// Which source addresses may continue a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceCheck {
    /// Any address.
    #[default]
    None,
    /// Only the address which created the session.
    Address,
    /// For IPv6, any address in the same /64 network. IPv4 addresses have to be equal.
    Prefix64,
}
impl SourceCheck {
    /// If `current` may continue a session created by `original`.
    #[must_use]
    pub fn allows(self, original: IpAddr, current: IpAddr) -> bool {
        match self {
            Self::None => true,
            Self::Address => original == current,
            Self::Prefix64 => match (original, current) {
                (IpAddr::V6(original), IpAddr::V6(current)) => {
                    original.octets()[..8] == current.octets()[..8]
                }
                (original, current) => original == current,
            },
        }
    }
}

/// A client's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: i64,
    expires: OffsetDateTime,
    principal: i64,
    address: IpAddr,
    user_agent: String,
    flags: u64,
    address_changed: bool,
}
impl Session {
    /// Creates a unauthenticated session.
    #[must_use]
    pub fn new(id: i64, expires: OffsetDateTime, address: IpAddr, user_agent: &str) -> Self {
        Self {
            id,
            expires,
            principal: 0,
            address,
            user_agent: user_agent.to_owned(),
            flags: 0,
            address_changed: false,
        }
    }
    /// The id. `0` for ephemeral sessions, which aren't persisted.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }
    /// If this session is in the store.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }
    /// When this session expires.
    #[must_use]
    pub fn expires(&self) -> OffsetDateTime {
        self.expires
    }
    /// If this session has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires <= now
    }
    /// The authenticated principal (e.g. user id). `0` if unauthenticated.
    #[must_use]
    pub fn principal(&self) -> i64 {
        self.principal
    }
    /// If a principal has authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.principal != 0
    }
    /// The address which created this session.
    #[must_use]
    pub fn address(&self) -> IpAddr {
        self.address
    }
    /// The user-agent which created this session.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
    /// If the session was resolved from another address than the one which created it.
    ///
    /// Only set when the [`SourceCheck`] allowed the new address.
    #[must_use]
    pub fn address_changed(&self) -> bool {
        self.address_changed
    }
    /// The authentication flags.
    #[must_use]
    pub fn flags(&self) -> u64 {
        self.flags
    }
    /// If the session has all the flags in `mask`.
    #[must_use]
    pub fn has_flags(&self, mask: u64) -> bool {
        self.flags & mask == mask
    }
}

/// A error from a [`SessionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A session with the id already exists.
    Duplicate,
    /// No session with the id exists.
    NotFound,
    /// The backend failed.
    Backend(String),
}
impl StoreError {
    /// Gets a string representation of [`StoreError`].
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Duplicate => "duplicate session id",
            Self::NotFound => "session not found",
            Self::Backend(message) => message,
        }
    }
}
impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
impl std::error::Error for StoreError {}
impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Error::internal(format_compact!("session store: {err}"))
    }
}

/// Storage of [`Session`]s.
///
/// The methods are blocking. [`Sessions`] calls them on the blocking thread pool or,
/// for [`Self::is_memory`] stores, directly.
pub trait SessionStore: Debug + Send + Sync + 'static {
    /// Inserts a new session.
    ///
    /// # Errors
    ///
    /// [`StoreError::Duplicate`] if the id is taken.
    fn insert(&self, session: &Session) -> Result<(), StoreError>;
    /// Overwrites the session with the same id.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] if the session doesn't exist.
    fn update(&self, session: &Session) -> Result<(), StoreError>;
    /// Sets the expiration of session `id`, leaving everything else as stored.
    /// Extending a missing session is not a error.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn extend(&self, id: i64, expires: OffsetDateTime) -> Result<(), StoreError>;
    /// Deletes the session `id`. Deleting a missing session is not a error.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn delete(&self, id: i64) -> Result<(), StoreError>;
    /// Gets all sessions matching `predicate`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    fn search(&self, predicate: &dyn Fn(&Session) -> bool) -> Result<Vec<Session>, StoreError>;
    /// If the store is in memory, and therefore cheap to write synchronously.
    fn is_memory(&self) -> bool {
        false
    }
}

/// A [`SessionStore`] in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: DashMap<i64, Session>,
}
impl MemoryStore {
    /// Creates a empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// The number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
    /// If no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
    /// Gets the session `id`.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<Session> {
        self.sessions.get(&id).map(|session| session.clone())
    }
}
impl SessionStore for MemoryStore {
    fn insert(&self, session: &Session) -> Result<(), StoreError> {
        match self.sessions.entry(session.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::Duplicate),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(())
            }
        }
    }
    fn update(&self, session: &Session) -> Result<(), StoreError> {
        let mut stored = self
            .sessions
            .get_mut(&session.id)
            .ok_or(StoreError::NotFound)?;
        *stored = session.clone();
        Ok(())
    }
    fn extend(&self, id: i64, expires: OffsetDateTime) -> Result<(), StoreError> {
        if let Some(mut stored) = self.sessions.get_mut(&id) {
            stored.expires = expires;
        }
        Ok(())
    }
    fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.sessions.remove(&id);
        Ok(())
    }
    fn search(&self, predicate: &dyn Fn(&Session) -> bool) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .filter(|session| predicate(session.value()))
            .map(|session| session.value().clone())
            .collect())
    }
    fn is_memory(&self) -> bool {
        true
    }
}

#[derive(Debug)]
enum Write {
    Update(Session),
    Extend(i64, OffsetDateTime),
    Delete(i64),
    Sweep,
}

async fn writer(store: Arc<dyn SessionStore>, mut queue: mpsc::Receiver<Write>) {
    while let Some(write) = queue.recv().await {
        let store = Arc::clone(&store);
        let result = spawn_blocking(move || match write {
            Write::Update(session) => store.update(&session),
            Write::Extend(id, expires) => store.extend(id, expires),
            Write::Delete(id) => store.delete(id),
            Write::Sweep => {
                let now = OffsetDateTime::now_utc();
                let expired = store.search(&|session| session.is_expired_at(now))?;
                for session in &expired {
                    store.delete(session.id)?;
                }
                if !expired.is_empty() {
                    debug!("Swept {} expired sessions", expired.len());
                }
                Ok(())
            }
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("Failed to write session: {err}"),
            Err(err) => error!("Session writer panicked: {err}"),
        }
    }
    debug!("Session writer stopped");
}

/// Resolves and persists the [`Session`]s of a server.
#[derive(Debug)]
pub struct Sessions {
    store: Arc<dyn SessionStore>,
    mode: SessionMode,
    source_check: SourceCheck,
    lifetime: Duration,
    queue: mpsc::Sender<Write>,
    last_sweep: AtomicI64,
}
impl Sessions {
    /// Creates the session manager of `store` and spawns it's background writer.
    ///
    /// The writer stops when the returned value is dropped.
    #[must_use]
    pub fn start(
        store: Arc<dyn SessionStore>,
        mode: SessionMode,
        source_check: SourceCheck,
        lifetime: Duration,
    ) -> Arc<Self> {
        let (queue, receiver) = mpsc::channel(QUEUE_CAPACITY);
        spawn(writer(Arc::clone(&store), receiver));
        Arc::new(Self {
            store,
            mode,
            source_check,
            lifetime,
            queue,
            last_sweep: AtomicI64::new(OffsetDateTime::now_utc().unix_timestamp()),
        })
    }
    /// The store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
    /// The mode.
    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    fn enqueue(&self, write: Write) {
        match self.queue.try_send(write) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(write)) => {
                warn!("Session write queue is full, dropping {write:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Session writer has stopped");
            }
        }
    }
    /// Writes synchronously for memory stores, else through the background writer.
    fn persist(&self, write: Write) -> Result<(), Error> {
        if !self.store.is_memory() {
            self.enqueue(write);
            return Ok(());
        }
        match write {
            Write::Update(session) => self.store.update(&session)?,
            Write::Extend(id, expires) => self.store.extend(id, expires)?,
            Write::Delete(id) => self.store.delete(id)?,
            Write::Sweep => self.enqueue(Write::Sweep),
        }
        Ok(())
    }
    /// Runs `task` on the store; on the blocking thread pool unless it's in memory.
    async fn with_store<T: Send + 'static>(
        &self,
        task: impl FnOnce(&dyn SessionStore) -> Result<T, StoreError> + Send + 'static,
    ) -> Result<T, StoreError> {
        if self.store.is_memory() {
            return task(&*self.store);
        }
        let store = Arc::clone(&self.store);
        spawn_blocking(move || task(&*store))
            .await
            .unwrap_or_else(|err| Err(StoreError::Backend(format!("store panicked: {err}"))))
    }

    /// Gets the session id sent by the client, if it's a positive integer.
    ///
    /// The `session` header takes precedence over the `Session` cookie.
    #[must_use]
    pub fn candidate(request: &Request) -> Option<i64> {
        let from_header = request.header(HEADER).map(str::to_owned);
        let from_cookie = || {
            request
                .headers()
                .get_all("cookie")
                .iter()
                .filter_map(|header| header.to_str().ok())
                .find_map(|header| parse::cookie(header, COOKIE).map(str::to_owned))
        };
        from_header
            .or_else(from_cookie)
            .and_then(|id| id.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
    }

    /// Finds the last valid session `id` created by the same user-agent.
    ///
    /// Expired sessions found are queued for deletion.
    async fn find(&self, id: i64, request: &Request, now: OffsetDateTime) -> Option<Session> {
        let user_agent = request.user_agent().to_owned();
        let matches = match self
            .with_store(move |store| {
                store.search(&|session| session.id == id && session.user_agent == user_agent)
            })
            .await
        {
            Ok(matches) => matches,
            Err(err) => {
                warn!("Failed to search for session {id}: {err}");
                return None;
            }
        };
        let current = request.address().ip();
        let mut found = None;
        for mut session in matches {
            if session.is_expired_at(now) {
                debug!("Session {id} has expired");
                self.enqueue(Write::Delete(id));
                continue;
            }
            if session.address != current {
                info!(
                    "Session {id} created by {} used from {current}",
                    session.address
                );
                if !self.source_check.allows(session.address, current) {
                    continue;
                }
                session.address_changed = true;
            }
            found = Some(session);
        }
        found
    }

    async fn create(&self, request: &Request, now: OffsetDateTime) -> Session {
        let address = request.address().ip();
        let expires = now + self.lifetime;
        let ephemeral = Session::new(0, expires, address, request.user_agent());
        if self.mode == SessionMode::None {
            return ephemeral;
        }
        let template = ephemeral.clone();
        let inserted = self
            .with_store(move |store| {
                let mut rng = rand::thread_rng();
                for _ in 0..MAX_ID_ATTEMPTS {
                    let session = Session {
                        id: rng.gen_range(1..=i64::MAX),
                        ..template.clone()
                    };
                    match store.insert(&session) {
                        Ok(()) => return Ok(Some(session)),
                        Err(StoreError::Duplicate) => continue,
                        Err(err) => return Err(err),
                    }
                }
                Ok(None)
            })
            .await;
        match inserted {
            Ok(Some(session)) => {
                debug!("Created session {} for {address}", session.id);
                session
            }
            Ok(None) => {
                error!("Failed to find a free session id in {MAX_ID_ATTEMPTS} attempts");
                ephemeral
            }
            Err(err) => {
                error!("Failed to insert session: {err}");
                ephemeral
            }
        }
    }

    fn sweep_if_due(&self, now: OffsetDateTime) {
        let now = now.unix_timestamp();
        let last = self.last_sweep.load(Ordering::Acquire);
        let interval = i64::try_from(SWEEP_INTERVAL.as_secs()).unwrap_or(i64::MAX);
        if now - last >= interval
            && self
                .last_sweep
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.enqueue(Write::Sweep);
        }
    }

    /// Resolves the session of `request`.
    ///
    /// A valid session sent by the client has it's expiration extended. Otherwise, a new
    /// session is created (or a ephemeral one, in [`SessionMode::None`]).
    pub async fn resolve(&self, request: &Request) -> Session {
        let now = OffsetDateTime::now_utc();
        if self.mode != SessionMode::None {
            if let Some(id) = Self::candidate(request) {
                if let Some(mut session) = self.find(id, request, now).await {
                    session.expires = now + self.lifetime;
                    self.enqueue(Write::Extend(session.id, session.expires));
                    self.sweep_if_due(now);
                    return session;
                }
            }
        }
        self.create(request, now).await
    }

    /// Authenticates `principal` with `flags` on `session`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::SessionRequired`] if the session isn't persisted,
    /// [`ErrorKind::AuthenticationRequired`] if another principal is authenticated on it
    /// and [`ErrorKind::InternalServerError`] if a memory store fails.
    pub fn authenticate(
        &self,
        session: &mut Session,
        principal: i64,
        flags: u64,
    ) -> Result<(), Error> {
        if !session.is_persisted() {
            return Err(Error::session_required("authentication requires a session"));
        }
        if session.principal != 0 && session.principal != principal {
            return Err(Error::authentication_required(
                "the session belongs to someone else",
            ));
        }
        session.principal = principal;
        session.flags = flags;
        session.expires = OffsetDateTime::now_utc() + self.lifetime;
        self.persist(Write::Update(session.clone()))
    }

    /// Ends `session`. The record is deleted, and the cookie or header sent with the answer
    /// expires now.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InternalServerError`] if a memory store fails.
    pub fn logout(&self, session: &mut Session) -> Result<(), Error> {
        session.principal = 0;
        session.flags = 0;
        session.expires = OffsetDateTime::now_utc();
        if session.is_persisted() {
            self.persist(Write::Delete(session.id))?;
        }
        Ok(())
    }

    /// Adds the cookie or header naming `session` to `headers`.
    pub fn add_headers(&self, session: &Session, headers: &mut HeaderMap) {
        if !session.is_persisted() {
            return;
        }
        let value = match self.mode {
            SessionMode::None => return,
            SessionMode::Cookie => format!(
                "{COOKIE}={}; Path=/; Expires={}; HttpOnly",
                session.id,
                answer::http_date(session.expires)
            ),
            SessionMode::Header => session.id.to_string(),
        };
        let name = if self.mode == SessionMode::Cookie {
            header::SET_COOKIE
        } else {
            HeaderName::from_static(HEADER)
        };
        // formatted from numbers and a date; always valid
        if let Ok(value) = HeaderValue::try_from(value) {
            headers.append(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;

    fn request(id: Option<i64>, user_agent: &str, address: IpAddr) -> Request {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_str(user_agent).unwrap());
        if let Some(id) = id {
            headers.insert(
                "cookie",
                HeaderValue::from_str(&format!("theme=dark; Session={id}")).unwrap(),
            );
        }
        let mut builder =
            RequestBuilder::new(Method::GET, Version::HTTP_11, SocketAddr::new(address, 1), 80)
                .headers(headers);
        builder.decode_url("/", false);
        builder.build()
    }
    fn local() -> IpAddr {
        IpAddr::V4(net::Ipv4Addr::LOCALHOST)
    }
    fn sessions(mode: SessionMode, check: SourceCheck) -> (Arc<MemoryStore>, Arc<Sessions>) {
        let store = Arc::new(MemoryStore::new());
        let sessions = Sessions::start(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            mode,
            check,
            Duration::from_secs(3600),
        );
        (store, sessions)
    }
    /// Lets the background writer catch up.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn same_client_same_session() {
        let (store, sessions) = sessions(SessionMode::Cookie, SourceCheck::None);
        let first = sessions.resolve(&request(None, "agent", local())).await;
        assert!(first.is_persisted());
        assert_eq!(store.len(), 1);

        let second = sessions
            .resolve(&request(Some(first.id()), "agent", local()))
            .await;
        assert_eq!(second.id(), first.id());
        assert!(second.expires() >= first.expires());
        assert!(!second.address_changed());

        let other_agent = sessions
            .resolve(&request(Some(first.id()), "other", local()))
            .await;
        assert_ne!(other_agent.id(), first.id());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn expired_session_replaced() {
        let (store, sessions) = sessions(SessionMode::Cookie, SourceCheck::None);
        let mut session = sessions.resolve(&request(None, "agent", local())).await;
        session.expires = OffsetDateTime::now_utc() - time::Duration::seconds(1);
        store.update(&session).unwrap();

        let next = sessions
            .resolve(&request(Some(session.id()), "agent", local()))
            .await;
        assert_ne!(next.id(), session.id());
        assert!(store.get(next.id()).is_some());
        settle().await;
        assert!(store.get(session.id()).is_none());
    }

    #[tokio::test]
    async fn source_checks() {
        let (_, sessions) = sessions(SessionMode::Header, SourceCheck::Prefix64);
        let a: IpAddr = "2001:db8:1:2::1".parse().unwrap();
        let b: IpAddr = "2001:db8:1:2::ff".parse().unwrap();
        let c: IpAddr = "2001:db8:1:3::1".parse().unwrap();
        let session = sessions.resolve(&request(None, "agent", a)).await;
        let id = Some(session.id());
        let same_network = sessions.resolve(&request(id, "agent", b)).await;
        assert_eq!(same_network.id(), session.id());
        assert!(same_network.address_changed());
        let other_network = sessions.resolve(&request(id, "agent", c)).await;
        assert_ne!(other_network.id(), session.id());

        assert!(SourceCheck::Address.allows(local(), local()));
        assert!(!SourceCheck::Address.allows(local(), a));
        assert!(!SourceCheck::Prefix64.allows(local(), "127.0.0.2".parse().unwrap()));
    }

    #[tokio::test]
    async fn moved_session_flagged() {
        let (store, sessions) = sessions(SessionMode::Cookie, SourceCheck::None);
        let session = sessions.resolve(&request(None, "agent", local())).await;
        let elsewhere: IpAddr = "192.0.2.7".parse().unwrap();

        let moved = sessions
            .resolve(&request(Some(session.id()), "agent", elsewhere))
            .await;
        assert_eq!(moved.id(), session.id());
        assert!(moved.address_changed());
        assert_eq!(moved.address(), local());
        settle().await;
        assert_eq!(store.get(session.id()).unwrap().address(), local());
    }

    #[tokio::test]
    async fn ephemeral_without_mode() {
        let (store, sessions) = sessions(SessionMode::None, SourceCheck::None);
        let mut session = sessions.resolve(&request(Some(5), "agent", local())).await;
        assert_eq!(session.id(), 0);
        assert!(store.is_empty());
        let error = sessions.authenticate(&mut session, 1, 0).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::SessionRequired);
        let mut headers = HeaderMap::new();
        sessions.add_headers(&session, &mut headers);
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn authentication() {
        let (store, sessions) = sessions(SessionMode::Cookie, SourceCheck::None);
        let mut session = sessions.resolve(&request(None, "agent", local())).await;
        assert!(!session.is_authenticated());
        sessions.authenticate(&mut session, 42, 0b101).unwrap();
        assert_eq!(store.get(session.id()).unwrap().principal(), 42);
        assert!(session.has_flags(0b100));
        assert!(!session.has_flags(0b010));
        // the same principal again is fine
        sessions.authenticate(&mut session, 42, 0b1).unwrap();
        let error = sessions.authenticate(&mut session, 7, 0).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::AuthenticationRequired);

        sessions.logout(&mut session).unwrap();
        assert!(!session.is_authenticated());
        assert!(store.get(session.id()).is_none());
    }

    #[tokio::test]
    async fn extension_keeps_authentication() {
        let (store, sessions) = sessions(SessionMode::Cookie, SourceCheck::None);
        let created = sessions.resolve(&request(None, "agent", local())).await;
        // queues a extension of the unauthenticated session
        let mut session = sessions
            .resolve(&request(Some(created.id()), "agent", local()))
            .await;
        sessions.authenticate(&mut session, 42, 1).unwrap();
        settle().await;
        let stored = store.get(session.id()).unwrap();
        assert_eq!(stored.principal(), 42);
        assert_eq!(stored.flags(), 1);

        let again = sessions
            .resolve(&request(Some(created.id()), "agent", local()))
            .await;
        assert_eq!(again.principal(), 42);
        settle().await;
        assert_eq!(store.get(session.id()).unwrap().principal(), 42);
    }

    /// A [`MemoryStore`] treated like a remote backend.
    #[derive(Debug, Default)]
    struct Remote(MemoryStore);
    impl SessionStore for Remote {
        fn insert(&self, session: &Session) -> Result<(), StoreError> {
            self.0.insert(session)
        }
        fn update(&self, session: &Session) -> Result<(), StoreError> {
            self.0.update(session)
        }
        fn extend(&self, id: i64, expires: OffsetDateTime) -> Result<(), StoreError> {
            self.0.extend(id, expires)
        }
        fn delete(&self, id: i64) -> Result<(), StoreError> {
            self.0.delete(id)
        }
        fn search(
            &self,
            predicate: &dyn Fn(&Session) -> bool,
        ) -> Result<Vec<Session>, StoreError> {
            self.0.search(predicate)
        }
    }

    #[tokio::test]
    async fn remote_store() {
        let store = Arc::new(Remote::default());
        let sessions = Sessions::start(
            Arc::clone(&store) as Arc<dyn SessionStore>,
            SessionMode::Cookie,
            SourceCheck::None,
            Duration::from_secs(3600),
        );
        let created = sessions.resolve(&request(None, "agent", local())).await;
        assert!(created.is_persisted());
        assert_eq!(store.0.len(), 1);

        let mut session = sessions
            .resolve(&request(Some(created.id()), "agent", local()))
            .await;
        assert_eq!(session.id(), created.id());
        sessions.authenticate(&mut session, 9, 0).unwrap();
        settle().await;
        assert_eq!(store.0.get(created.id()).unwrap().principal(), 9);

        sessions.logout(&mut session).unwrap();
        settle().await;
        assert!(store.0.is_empty());
    }

    #[tokio::test]
    async fn candidates_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("session", HeaderValue::from_static("12"));
        headers.insert("cookie", HeaderValue::from_static("Session=13"));
        let request = RequestBuilder::new(Method::GET, Version::HTTP_11, "[::1]:1".parse().unwrap(), 80)
            .headers(headers)
            .build();
        assert_eq!(Sessions::candidate(&request), Some(12));
        assert_eq!(Sessions::candidate(&self::request(Some(-3), "", local())), None);

        let (_, sessions) = sessions(SessionMode::Cookie, SourceCheck::None);
        let session = sessions.resolve(&self::request(None, "agent", local())).await;
        let mut headers = HeaderMap::new();
        sessions.add_headers(&session, &mut headers);
        let cookie = headers.get("set-cookie").unwrap().to_str().unwrap();
        assert!(cookie.starts_with(&format!("Session={}; Path=/; Expires=", session.id())));
        assert!(cookie.ends_with("GMT; HttpOnly"));
    }
}
