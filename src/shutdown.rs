//! Graceful shutdown for Hearth.
//!
//! This is handled through a [`Manager`] and the [`AcceptManager`] of each listener.
//! The `Manager` is returned from [`RunConfig::execute`] and can be awaited
//! to pause execution till the server is shut down.
//! It is also used to trigger a shutdown.
//!
//! On shutdown, listeners stop accepting immediately, while connections finish the
//! exchange they're in and then close.
use crate::prelude::{networking::*, threading::*, *};
use atomic::{AtomicBool, AtomicIsize};
use tokio::sync::watch;

/// Shutdown manager.
/// Contains a counter of connections and a shutdown flag
/// to determine when to finish the shutdown.
///
/// Waiting on shutdown is handled using [`tokio::sync::watch`].
#[derive(Debug)]
#[must_use]
pub struct Manager {
    shutdown: AtomicBool,
    connections: AtomicIsize,

    /// Set to `true` when the shutdown is initiated.
    signal: watch::Sender<bool>,
    /// Set to `true` when the last connection is closed after the shutdown was initiated.
    finished: watch::Sender<bool>,
}
impl Manager {
    /// Creates a new shutdown manager.
    pub fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            connections: AtomicIsize::new(0),
            signal: watch::channel(false).0,
            finished: watch::channel(false).0,
        }
    }
    /// Wraps [`Self`] in a [`Arc`] to use across [`tokio::task`]s.
    #[must_use]
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }
    /// Adds a listener to this manager.
    ///
    /// The `accept` future of the returned value resolves immediately when the shutdown is triggered.
    pub fn add_listener(&self, listener: TcpListener) -> AcceptManager {
        AcceptManager {
            signal: self.signal.subscribe(),
            listener,
        }
    }
    /// Adds to the count of connections.
    /// When this connection is closed, you must call [`Manager::remove_connection`]
    /// or a shutdown will never finish.
    pub fn add_connection(&self) {
        self.connections.fetch_add(1, Ordering::AcqRel);
    }
    /// Adds to the count of connections until the returned guard is dropped.
    ///
    /// The guard also removes the connection when the task handling it panics.
    pub fn connection(self: &Arc<Self>) -> ConnectionGuard {
        self.add_connection();
        ConnectionGuard {
            manager: Arc::clone(self),
        }
    }
    /// Removes from the count of connections.
    /// If the count reaches 0 and the shutdown flag is set, the shutdown finishes.
    pub fn remove_connection(&self) {
        // - 1 at the end because fetch returns the old value.
        let connections = self.connections.fetch_sub(1, Ordering::AcqRel) - 1;
        if connections < 0 {
            error!("Connection count is less than 0. Please report this error.");
        }
        if connections <= 0 && self.get_shutdown() {
            self.finish();
        }
    }
    /// The number of open connections.
    #[must_use]
    pub fn connections(&self) -> isize {
        self.connections.load(Ordering::Acquire)
    }
    /// Gets the value of the shutdown flag. This signals a graceful shutdown is underway.
    #[must_use]
    pub fn get_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Makes Hearth perform a graceful shutdown.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Initiating shutdown.");
        // we stop listening immediately
        self.signal.send_replace(true);
        if self.connections.load(Ordering::Acquire) <= 0 {
            self.finish();
        }
    }
    fn finish(&self) {
        info!("Sending shutdown signal");
        self.finished.send_replace(true);
    }

    /// Resolves when the shutdown is initiated.
    ///
    /// Connections use this to stop waiting for the next request.
    pub async fn signal(&self) {
        let mut receiver = self.signal.subscribe();
        // the sender lives in `self`
        let _ = receiver.wait_for(|shutdown| *shutdown).await;
    }
    /// Waits for Hearth to shut down; when the shutdown is initiated
    /// and all connections are closed.
    pub async fn wait(&self) {
        let mut receiver = self.finished.subscribe();
        let _ = receiver.wait_for(|finished| *finished).await;
        info!("Received shutdown signal");
    }
}

/// A open connection, counted by the [`Manager`] until dropped.
#[derive(Debug)]
#[must_use = "the connection is removed when this is dropped"]
pub struct ConnectionGuard {
    manager: Arc<Manager>,
}
impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.manager.remove_connection();
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

/// The result of [`AcceptManager::accept`].
/// Can either be a new connection or a shutdown signal.
/// The listener should be dropped right after the shutdown signal is received.
#[derive(Debug)]
#[must_use]
pub enum AcceptAction {
    /// Shutdown signal; immediately drop this struct.
    Shutdown,
    /// Accept a new connection or handle a IO error.
    Accept(io::Result<(TcpStream, SocketAddr)>),
}
/// A wrapper around [`TcpListener`] which waits for a new connection **or** a shutdown signal.
#[derive(Debug)]
#[must_use]
pub struct AcceptManager {
    signal: watch::Receiver<bool>,
    listener: TcpListener,
}
impl AcceptManager {
    /// Waits for a new connection or a shutdown signal.
    ///
    /// Hold a [`Manager::connection`] guard for as long as the accepted connection lives.
    pub async fn accept(&mut self) -> AcceptAction {
        if *self.signal.borrow() {
            return AcceptAction::Shutdown;
        }
        tokio::select! {
            accepted = self.listener.accept() => AcceptAction::Accept(accepted),
            _ = self.signal.wait_for(|shutdown| *shutdown) => AcceptAction::Shutdown,
        }
    }
    /// Returns a reference to the inner listener.
    pub fn get_inner(&self) -> &TcpListener {
        &self.listener
    }
}
