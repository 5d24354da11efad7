//! Named locks serializing push-pull per datatype.

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{trace, warn};

/// Proof of one acquisition, required to release it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(u64);

impl LockToken {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Mutual exclusion by name with a bounded lease.
///
/// May be backed by a process-local or a distributed primitive.
#[async_trait]
pub trait Locker: Send + Sync + Debug {
    /// Acquire `name`, waiting at most the locker's timeout. Returns the
    /// token of this acquisition, or `None` when the wait timed out.
    async fn try_lock(&self, name: &str) -> Option<LockToken>;

    /// Release `name` if it is still held under `token`. A holder whose
    /// lease was taken over releases nothing.
    async fn unlock(&self, name: &str, token: LockToken);
}

/// Process-local [`Locker`].
///
/// A lock not released within its lease is considered abandoned and may be
/// taken by the next caller.
#[derive(Debug)]
pub struct LocalLocker {
    held: Mutex<HashMap<String, (LockToken, Instant)>>,
    released: Notify,
    next_token: AtomicU64,
    lease: Duration,
    timeout: Duration,
}

impl LocalLocker {
    const POLL: Duration = Duration::from_millis(20);

    pub fn new(lease: Duration, timeout: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Notify::new(),
            next_token: AtomicU64::new(1),
            lease,
            timeout,
        }
    }

    async fn acquire(&self, name: &str) -> Option<LockToken> {
        let now = Instant::now();
        let mut held = self.held.lock().await;
        match held.get(name) {
            Some((_, expires)) if *expires > now => return None,
            Some((token, _)) => {
                warn!(lock = name, token = token.id(), "taking over expired lock");
            }
            None => {}
        }
        let token = LockToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        held.insert(name.to_string(), (token, now + self.lease));
        Some(token)
    }
}

#[async_trait]
impl Locker for LocalLocker {
    async fn try_lock(&self, name: &str) -> Option<LockToken> {
        let deadline = Instant::now() + self.timeout;
        loop {
            // register interest before checking so a release in between is seen
            let released = self.released.notified();
            if let Some(token) = self.acquire(name).await {
                trace!(lock = name, token = token.id(), "locked");
                return Some(token);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait = (deadline - now).min(Self::POLL);
            let _ = tokio::time::timeout(wait, released).await;
        }
    }

    async fn unlock(&self, name: &str, token: LockToken) {
        let mut held = self.held.lock().await;
        match held.get(name) {
            Some((current, _)) if *current == token => {
                held.remove(name);
                trace!(lock = name, token = token.id(), "unlocked");
                self.released.notify_waiters();
            }
            Some((current, _)) => warn!(
                lock = name,
                token = token.id(),
                holder = current.id(),
                "lease was taken over; not unlocking"
            ),
            None => {}
        }
    }
}
