//! Guards against abusive clients.
//!
//! Each source address gets a [`FirewallEntry`] counting it's consecutive errors.
//! The more errors, the longer the client has to wait between requests;
//! see [`FirewallEntry::wait_time`].
//!
//! The [`Firewall`] only observes by default. In [`FirewallMode::Enforce`],
//! requests arriving before the wait time has passed are answered with
//! `429 Too Many Requests` without invoking the handler.
//!
//! All counters are atomics, so the hot path never locks more than a shard of the table.

use crate::prelude::{threading::*, *};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Entries idle for longer than this are removed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
/// How often the [`Firewall`] removes idle entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// The time since the Unix epoch, in milliseconds.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX))
}

/// The error counter and last access of a single source address.
#[derive(Debug)]
pub struct FirewallEntry {
    address: IpAddr,
    errors: AtomicU32,
    last_access: AtomicU64,
    waiters: AtomicUsize,
}
impl FirewallEntry {
    /// Creates a entry for `address`, with it's last access now.
    #[must_use]
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            errors: AtomicU32::new(0),
            last_access: AtomicU64::new(now_ms()),
            waiters: AtomicUsize::new(0),
        }
    }
    /// The source address.
    #[must_use]
    pub fn address(&self) -> IpAddr {
        self.address
    }
    /// The number of errors since the last success.
    #[must_use]
    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::Acquire)
    }
    /// The number of requests currently waiting.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    /// Resets the error counter.
    pub fn success(&self) {
        self.errors.store(0, Ordering::Release);
        self.last_access.store(now_ms(), Ordering::Release);
    }
    /// Increments the error counter.
    pub fn error(&self) {
        self.errors.fetch_add(1, Ordering::AcqRel);
        self.last_access.store(now_ms(), Ordering::Release);
    }

    /// The time left to wait before the next request, given the current error count.
    #[must_use]
    pub fn wait_time(&self) -> Duration {
        self.wait_time_with(self.errors(), now_ms())
    }
    /// The time left to wait at `now` (milliseconds since the Unix epoch)
    /// if the entry had `errors` errors.
    ///
    /// Zero without errors, otherwise `last access + 100ms × errors² + 1s - now`,
    /// but never negative.
    #[must_use]
    pub fn wait_time_with(&self, errors: u32, now: u64) -> Duration {
        if errors == 0 {
            return Duration::ZERO;
        }
        let errors = u64::from(errors);
        let penalty = errors.saturating_mul(errors).saturating_mul(100);
        let until = self
            .last_access
            .load(Ordering::Acquire)
            .saturating_add(penalty)
            .saturating_add(1000);
        Duration::from_millis(until.saturating_sub(now))
    }

    /// Registers a waiting request. The returned guard [`Self::exit`]s on drop.
    #[must_use]
    pub fn enter(self: &Arc<Self>) -> Waiter {
        self.waiters.fetch_add(1, Ordering::AcqRel);
        Waiter(Arc::clone(self))
    }
    /// Unregisters a waiting request.
    pub fn exit(&self) {
        self.waiters.fetch_sub(1, Ordering::AcqRel);
    }

    /// If the entry has been idle for longer than [`IDLE_TIMEOUT`] at `now`.
    #[must_use]
    pub fn idle(&self, now: u64) -> bool {
        let idle_ms = u64::try_from(IDLE_TIMEOUT.as_millis()).unwrap_or(u64::MAX);
        now.saturating_sub(self.last_access.load(Ordering::Acquire)) > idle_ms
            && self.waiters() == 0
    }
}

/// Guard from [`FirewallEntry::enter`].
#[derive(Debug)]
#[must_use]
pub struct Waiter(Arc<FirewallEntry>);
impl Drop for Waiter {
    fn drop(&mut self) {
        self.0.exit();
    }
}

/// What the [`Firewall`] does with clients which have to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirewallMode {
    /// Only log the wait time.
    #[default]
    Observe,
    /// Reject requests with `429 Too Many Requests` while the wait time is positive.
    Enforce,
}

/// The verdict of [`Firewall::check`].
#[derive(Debug)]
pub enum Verdict {
    /// Continue with the request.
    Pass(Waiter),
    /// Reject the request; the client has to wait this long.
    Reject(Duration),
}

/// The table of [`FirewallEntry`]s, shared by all connections.
#[derive(Debug)]
pub struct Firewall {
    entries: DashMap<IpAddr, Arc<FirewallEntry>>,
    mode: FirewallMode,
}
impl Firewall {
    /// Creates a empty firewall.
    #[must_use]
    pub fn new(mode: FirewallMode) -> Self {
        Self {
            entries: DashMap::new(),
            mode,
        }
    }
    /// Creates a firewall and spawns a task which periodically removes idle entries.
    ///
    /// The task stops when the firewall is dropped.
    #[must_use]
    pub fn start(mode: FirewallMode) -> Arc<Self> {
        let firewall = Arc::new(Self::new(mode));
        let weak = Arc::downgrade(&firewall);
        spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(firewall) = weak.upgrade() else {
                    break;
                };
                firewall.sweep();
            }
        });
        firewall
    }
    /// The mode.
    #[must_use]
    pub fn mode(&self) -> FirewallMode {
        self.mode
    }
    /// Gets the entry of `address`, creating it on first contact.
    #[must_use]
    pub fn entry(&self, address: IpAddr) -> Arc<FirewallEntry> {
        Arc::clone(
            self.entries
                .entry(address)
                .or_insert_with(|| Arc::new(FirewallEntry::new(address)))
                .value(),
        )
    }
    /// Consults the entry of `address`.
    ///
    /// Never fails: in [`FirewallMode::Observe`], the wait time is only logged.
    pub fn check(&self, address: IpAddr) -> Verdict {
        let entry = self.entry(address);
        let wait = entry.wait_time();
        if wait.is_zero() {
            return Verdict::Pass(entry.enter());
        }
        match self.mode {
            FirewallMode::Observe => {
                debug!(
                    "{address} would have to wait {wait:?} after {} errors",
                    entry.errors()
                );
                Verdict::Pass(entry.enter())
            }
            FirewallMode::Enforce => {
                info!(
                    "Rejecting {address}, which has to wait {wait:?} after {} errors",
                    entry.errors()
                );
                Verdict::Reject(wait)
            }
        }
    }
    /// Records the outcome of a request from `address`.
    pub fn record(&self, address: IpAddr, error: bool) {
        let entry = self.entry(address);
        if error {
            entry.error();
        } else {
            entry.success();
        }
    }
    /// Removes idle entries.
    pub fn sweep(&self) {
        let now = now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.idle(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Removed {removed} idle firewall entries");
        }
    }
    /// The number of tracked addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    /// If no addresses are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
