//! Bounded per-server session pool.
//!
//! One pool exists per (scheme, host, port, user). A task leases a session
//! with [`SessionPool::hold`]; holds are re-entrant per (task, mailbox
//! key), so nested operations reuse the same session without counting
//! against the bound twice. Idle sessions are shared across mailboxes on
//! the server key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::session::{Session, SessionOptions};
use crate::uri::ImapUri;
use crate::{Error, Result};

/// Sizing and wait behavior for a pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum concurrent sessions to one server.
    pub max_connections: usize,
    /// How long `hold` waits for a free session.
    pub timeout: Duration,
    /// Poll interval while waiting.
    pub sleep: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 4,
            timeout: Duration::from_secs(60),
            sleep: Duration::from_millis(10),
        }
    }
}

/// Identity of a lease holder: the task plus the mailbox-sensitive key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LeaseKey {
    holder: HolderId,
    mailbox_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum HolderId {
    /// A tokio task.
    Task(tokio::task::Id),
    /// Code running outside any task; never shares a lease.
    Unique(u64),
}

fn current_holder() -> HolderId {
    static FALLBACK: AtomicU64 = AtomicU64::new(0);
    tokio::task::try_id().map_or_else(
        || HolderId::Unique(FALLBACK.fetch_add(1, Ordering::Relaxed)),
        HolderId::Task,
    )
}

struct LeaseEntry {
    session: Arc<tokio::sync::Mutex<Session>>,
    /// Dies when every lease handle for this entry is dropped; a dead
    /// token with the entry still present means the holding task is gone.
    token: Weak<()>,
}

struct Inner {
    idle: Vec<Session>,
    leases: HashMap<LeaseKey, LeaseEntry>,
}

impl Inner {
    /// Removes entries whose holders died and reclaims their sessions.
    fn reap(&mut self) {
        let dead: Vec<LeaseKey> = self
            .leases
            .iter()
            .filter(|(_, entry)| entry.token.upgrade().is_none())
            .map(|(key, _)| key.clone())
            .collect();
        for key in dead {
            if let Some(entry) = self.leases.remove(&key) {
                debug!(?key.mailbox_key, "reaping session from dead holder");
                if let Ok(mutex) = Arc::try_unwrap(entry.session) {
                    self.idle.push(mutex.into_inner());
                }
                // A still-shared Arc means a guard is alive somewhere;
                // the session is lost to the pool but not leaked.
            }
        }
    }

    fn active(&self) -> usize {
        self.leases.len()
    }
}

/// A leased session. Lock it to use it; the same task holding the same
/// mailbox key gets handles to the same session.
pub struct SessionLease {
    key: LeaseKey,
    session: Arc<tokio::sync::Mutex<Session>>,
    _token: Arc<()>,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease").field("key", &self.key).finish_non_exhaustive()
    }
}

impl SessionLease {
    /// Locks the leased session for use.
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, Session> {
        self.session.lock().await
    }

    /// True when `other` refers to the same underlying session.
    #[must_use]
    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }
}

/// Bounded pool of authenticated sessions to one server.
pub struct SessionPool {
    uri: ImapUri,
    session_options: SessionOptions,
    options: PoolOptions,
    inner: Mutex<Inner>,
}

impl SessionPool {
    /// Creates a pool for the server named by `uri` (its mailbox path is
    /// ignored for pooling purposes).
    #[must_use]
    pub fn new(uri: ImapUri, session_options: SessionOptions, options: PoolOptions) -> Self {
        Self {
            uri,
            session_options,
            options,
            inner: Mutex::new(Inner { idle: Vec::new(), leases: HashMap::new() }),
        }
    }

    /// The server URI this pool connects to.
    #[must_use]
    pub const fn uri(&self) -> &ImapUri {
        &self.uri
    }

    /// Leases a session to the current task for `mailbox`.
    ///
    /// Re-entrant: if this task already holds a lease for the same
    /// mailbox key, the same session comes back and the bound is not
    /// consulted. Otherwise an idle session is reused or a new one
    /// created up to the bound; at the bound the call polls until
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// [`Error::PoolTimeout`] when no session frees up in time; connect
    /// or authentication errors from starting a fresh session.
    pub async fn hold(&self, mailbox: Option<&str>) -> Result<SessionLease> {
        let key = LeaseKey {
            holder: current_holder(),
            mailbox_key: self.uri.with_mailbox(mailbox).key_mailbox(),
        };

        let deadline = Instant::now() + self.options.timeout;
        let (lease, fresh) = loop {
            if let Some(acquired) = self.try_acquire(&key) {
                break acquired;
            }
            if Instant::now() >= deadline {
                return Err(Error::PoolTimeout(self.options.timeout));
            }
            tokio::time::sleep(self.options.sleep).await;
        };

        if fresh {
            // Connect and authenticate before handing the session out.
            let result = { lease.lock().await.start().await };
            if let Err(e) = result {
                self.discard(&lease.key);
                return Err(e);
            }
        }
        Ok(lease)
    }

    /// Releases a lease. When this was the holder's last handle, the
    /// session's mailbox is unselected and it returns to the idle list.
    pub async fn release(&self, lease: SessionLease) {
        let SessionLease { key, session, _token } = lease;
        drop(_token);
        drop(session);

        let recovered = {
            #[allow(clippy::unwrap_used)] // lock poisoning is unrecoverable
            let mut inner = self.inner.lock().unwrap();
            let fully_released = inner
                .leases
                .get(&key)
                .is_some_and(|entry| entry.token.upgrade().is_none());
            if fully_released {
                inner
                    .leases
                    .remove(&key)
                    .and_then(|entry| Arc::try_unwrap(entry.session).ok())
                    .map(tokio::sync::Mutex::into_inner)
            } else {
                None
            }
        };

        // Unselect before others reuse it; a session that cannot be put
        // into a clean state is reconnected lazily instead.
        if let Some(mut session) = recovered {
            if session.close_mailbox().await.is_err() {
                session.drop_connection();
            }
            #[allow(clippy::unwrap_used)]
            self.inner.lock().unwrap().idle.push(session);
        }
    }

    /// Runs `op` with a leased session, releasing it afterwards.
    ///
    /// # Errors
    ///
    /// Propagates lease acquisition and operation errors.
    pub async fn with<T, E>(
        &self,
        mailbox: Option<&str>,
        op: impl AsyncFnOnce(&mut Session) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        let lease = self.hold(mailbox).await?;
        let result = {
            let mut session = lease.lock().await;
            op(&mut session).await
        };
        self.release(lease).await;
        result
    }

    /// Closes every idle session. Leased sessions are left alone.
    pub async fn disconnect(&self) {
        let idle = {
            #[allow(clippy::unwrap_used)]
            let mut inner = self.inner.lock().unwrap();
            std::mem::take(&mut inner.idle)
        };
        for mut session in idle {
            session.disconnect().await;
        }
    }

    /// Number of live leases; for tests and diagnostics.
    #[must_use]
    pub fn active_leases(&self) -> usize {
        #[allow(clippy::unwrap_used)]
        let inner = self.inner.lock().unwrap();
        inner.active()
    }

    fn try_acquire(&self, key: &LeaseKey) -> Option<(SessionLease, bool)> {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap();

        // Re-entrant path: same holder, same mailbox key.
        if let Some(entry) = inner.leases.get(key) {
            if let Some(token) = entry.token.upgrade() {
                return Some((
                    SessionLease {
                        key: key.clone(),
                        session: Arc::clone(&entry.session),
                        _token: token,
                    },
                    false,
                ));
            }
        }

        if let Some(session) = inner.idle.pop() {
            return Some((self.install(&mut inner, key, session), false));
        }

        if inner.active() + inner.idle.len() >= self.options.max_connections {
            // At the bound: prune dead holders before giving up this round.
            inner.reap();
        }
        if let Some(session) = inner.idle.pop() {
            return Some((self.install(&mut inner, key, session), false));
        }
        if inner.active() + inner.idle.len() < self.options.max_connections {
            let session = Session::new(
                self.uri.with_mailbox(None),
                self.session_options.clone(),
            );
            return Some((self.install(&mut inner, key, session), true));
        }
        None
    }

    fn install(&self, inner: &mut Inner, key: &LeaseKey, session: Session) -> SessionLease {
        let session = Arc::new(tokio::sync::Mutex::new(session));
        let token = Arc::new(());
        inner.leases.insert(
            key.clone(),
            LeaseEntry {
                session: Arc::clone(&session),
                token: Arc::downgrade(&token),
            },
        );
        SessionLease { key: key.clone(), session, _token: token }
    }

    fn discard(&self, key: &LeaseKey) {
        #[allow(clippy::unwrap_used)]
        let mut inner = self.inner.lock().unwrap();
        inner.leases.remove(key);
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("server", &self.uri.key_server())
            .field("max_connections", &self.options.max_connections)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn pool(max: usize) -> SessionPool {
        let uri = ImapUri::parse("imaps://u:p@mail.example.com/INBOX").unwrap();
        SessionPool::new(
            uri,
            SessionOptions::default(),
            PoolOptions {
                max_connections: max,
                timeout: Duration::from_millis(50),
                sleep: Duration::from_millis(5),
            },
        )
    }

    // Acquisition without start(): exercise try_acquire directly so no
    // network I/O happens.
    fn acquire(p: &SessionPool, mailbox: &str) -> Option<SessionLease> {
        let key = LeaseKey {
            holder: current_holder(),
            mailbox_key: p.uri.with_mailbox(Some(mailbox)).key_mailbox(),
        };
        p.try_acquire(&key).map(|(lease, _)| lease)
    }

    #[tokio::test]
    async fn reentrant_hold_shares_the_session() {
        let p = pool(1);
        let a = acquire(&p, "INBOX").unwrap();
        let b = acquire(&p, "INBOX").unwrap();
        assert!(a.same_session(&b));
        assert_eq!(p.active_leases(), 1);
    }

    #[tokio::test]
    async fn different_mailbox_gets_a_distinct_lease() {
        let p = pool(2);
        let a = acquire(&p, "INBOX").unwrap();
        let b = acquire(&p, "Archive").unwrap();
        assert!(!a.same_session(&b));
        assert_eq!(p.active_leases(), 2);
    }

    #[tokio::test]
    async fn bound_is_enforced() {
        let p = pool(1);
        let _a = acquire(&p, "INBOX").unwrap();
        // Same task, different mailbox key: needs a second session, but
        // the bound is 1 and the first holder is alive.
        assert!(acquire(&p, "Archive").is_none());
    }

    #[tokio::test]
    async fn hold_times_out_at_the_bound() {
        let p = pool(1);
        let _a = acquire(&p, "INBOX").unwrap();
        let err = p.hold(Some("Archive")).await.unwrap_err();
        assert!(matches!(err, Error::PoolTimeout(_)));
    }

    #[tokio::test]
    async fn dead_holder_is_reaped() {
        let p = Arc::new(pool(1));
        let p2 = Arc::clone(&p);
        // Take a lease on another task and drop it without releasing.
        let handle = tokio::spawn(async move {
            let lease = acquire(&p2, "INBOX").unwrap();
            drop(lease);
        });
        handle.await.unwrap();
        assert_eq!(p.active_leases(), 1); // entry still present...
        let lease = acquire(&p, "Archive");
        assert!(lease.is_some()); // ...but reaped once the bound is hit
    }
}
