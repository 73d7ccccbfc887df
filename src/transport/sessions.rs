//! # Session Table
//!
//! Peer-address keyed registry of live handshakes.
//!
//! Only insert-if-absent and eviction need exclusive access; everything a session does
//! after that happens in its own worker. Entries record when their session last made
//! progress ([`SessionTable::touch`]), not when their peer was last heard from, so a peer
//! retransmitting into a stalled handshake still times out. Entries are stale once idle
//! for longer than the configured timeout or once the optional finished check says so.
//!
//! ## Usage
//! ```ignore
//! use tsproto_handshake::transport::sessions::SessionTable;
//! use std::time::Duration;
//!
//! let table = SessionTable::new(10_000, Duration::from_secs(30))
//!     .with_finished_check(|queue: &Sender<BytesMut>| queue.is_closed());
//! let lookup = table.get_or_insert_with(peer, || spawn_worker(peer)).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{ProtocolError, Result};

#[derive(Debug)]
struct SessionEntry<T> {
    value: T,
    created_at: Instant,
    last_seen: Instant,
}

impl<T> SessionEntry<T> {
    fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Result of [`SessionTable::get_or_insert_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLookup<T> {
    pub value: T,
    /// A new session was created for the peer.
    pub created: bool,
    /// Stale sessions dropped to make room for this one.
    pub evicted: Vec<SocketAddr>,
}

/// Thread-safe map from peer address to a per-session value (typically the peer's queue).
pub struct SessionTable<T> {
    max_entries: usize,
    idle_timeout: Duration,
    is_finished: Option<fn(&T) -> bool>,
    inner: Arc<Mutex<SessionTableInner<T>>>,
}

impl<T> fmt::Debug for SessionTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTable")
            .field("max_entries", &self.max_entries)
            .field("idle_timeout", &self.idle_timeout)
            .field("finished_check", &self.is_finished.is_some())
            .finish_non_exhaustive()
    }
}

impl<T> Clone for SessionTable<T> {
    fn clone(&self) -> Self {
        Self {
            max_entries: self.max_entries,
            idle_timeout: self.idle_timeout,
            is_finished: self.is_finished,
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug)]
struct SessionTableInner<T> {
    sessions: HashMap<SocketAddr, SessionEntry<T>>,
    total_inserts: u64,
    total_evictions: u64,
}

impl<T: Clone> SessionTable<T> {
    /// Create a table holding at most `max_entries` sessions.
    pub fn new(max_entries: usize, idle_timeout: Duration) -> Self {
        Self {
            max_entries,
            idle_timeout,
            is_finished: None,
            inner: Arc::new(Mutex::new(SessionTableInner {
                sessions: HashMap::new(),
                total_inserts: 0,
                total_evictions: 0,
            })),
        }
    }

    /// Treat entries for which `check` returns true as stale, whatever their idle time.
    pub fn with_finished_check(mut self, check: fn(&T) -> bool) -> Self {
        self.is_finished = Some(check);
        self
    }

    /// Look up the session for `peer`, creating it with `create` if absent.
    ///
    /// A lookup never refreshes the idle clock; see [`SessionTable::touch`]. Fails with
    /// `TransportError` if the table is full even after dropping stale sessions.
    pub async fn get_or_insert_with<F>(
        &self,
        peer: SocketAddr,
        create: F,
    ) -> Result<SessionLookup<T>>
    where
        F: FnOnce() -> T,
    {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if let Some(entry) = inner.sessions.get(&peer) {
            return Ok(SessionLookup {
                value: entry.value.clone(),
                created: false,
                evicted: Vec::new(),
            });
        }

        let mut evicted = Vec::new();
        if inner.sessions.len() >= self.max_entries {
            evicted = self.evict_stale_locked(&mut inner, now);
            if inner.sessions.len() >= self.max_entries {
                return Err(ProtocolError::TransportError(format!(
                    "session table full ({} entries), refusing {peer}",
                    self.max_entries
                )));
            }
        }

        let value = create();
        inner.sessions.insert(
            peer,
            SessionEntry {
                value: value.clone(),
                created_at: now,
                last_seen: now,
            },
        );
        inner.total_inserts += 1;
        trace!(%peer, session_count = inner.sessions.len(), "Session created");
        Ok(SessionLookup {
            value,
            created: true,
            evicted,
        })
    }

    /// Record progress for `peer`, restarting its idle clock. Returns false if the peer
    /// has no session.
    pub async fn touch(&self, peer: &SocketAddr) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.sessions.get_mut(peer) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Current value for `peer` without refreshing its idle clock.
    pub async fn get(&self, peer: &SocketAddr) -> Option<T> {
        let inner = self.inner.lock().await;
        inner.sessions.get(peer).map(|entry| entry.value.clone())
    }

    /// Remove the session for `peer`, returning its value.
    pub async fn remove(&self, peer: &SocketAddr) -> Option<T> {
        let mut inner = self.inner.lock().await;
        inner.sessions.remove(peer).map(|entry| entry.value)
    }

    /// Drop every session idle for longer than the timeout or finished, and return
    /// their addresses.
    pub async fn evict_stale(&self) -> Vec<SocketAddr> {
        let mut inner = self.inner.lock().await;
        self.evict_stale_locked(&mut inner, Instant::now())
    }

    /// Remove all sessions, returning how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let count = inner.sessions.len();
        inner.sessions.clear();
        debug!(cleared_count = count, "Session table cleared");
        count
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.sessions.is_empty()
    }

    /// Get current table statistics
    pub async fn stats(&self) -> SessionTableStats {
        let inner = self.inner.lock().await;
        let now = Instant::now();

        SessionTableStats {
            total_entries: inner.sessions.len(),
            max_entries: self.max_entries,
            idle_count: inner
                .sessions
                .values()
                .filter(|entry| entry.is_idle(now, self.idle_timeout))
                .count(),
            oldest_age: inner
                .sessions
                .values()
                .map(|entry| now.saturating_duration_since(entry.created_at))
                .max(),
            total_inserts: inner.total_inserts,
            total_evictions: inner.total_evictions,
        }
    }

    fn is_stale(&self, entry: &SessionEntry<T>, now: Instant) -> bool {
        entry.is_idle(now, self.idle_timeout)
            || self.is_finished.is_some_and(|finished| finished(&entry.value))
    }

    // called with the lock held
    fn evict_stale_locked(&self, inner: &mut SessionTableInner<T>, now: Instant) -> Vec<SocketAddr> {
        let stale: Vec<SocketAddr> = inner
            .sessions
            .iter()
            .filter(|(_, entry)| self.is_stale(entry, now))
            .map(|(peer, _)| *peer)
            .collect();

        for peer in &stale {
            inner.sessions.remove(peer);
        }
        inner.total_evictions += stale.len() as u64;

        if !stale.is_empty() {
            debug!(
                removed_count = stale.len(),
                remaining_count = inner.sessions.len(),
                "Stale sessions evicted"
            );
        }
        stale
    }
}

/// Statistics about the session table
#[derive(Debug, Clone, Copy)]
pub struct SessionTableStats {
    /// Current number of sessions
    pub total_entries: usize,
    /// Maximum capacity
    pub max_entries: usize,
    /// Sessions past the idle timeout but not yet evicted
    pub idle_count: usize,
    /// Age of the longest-lived session
    pub oldest_age: Option<Duration>,
    /// Total sessions ever created
    pub total_inserts: u64,
    /// Total sessions evicted as idle or finished
    pub total_evictions: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_insert_if_absent() {
        let table = SessionTable::new(10, Duration::from_secs(60));

        let lookup = table.get_or_insert_with(peer(1), || 7u32).await.unwrap();
        assert_eq!((lookup.value, lookup.created), (7, true));

        let lookup = table.get_or_insert_with(peer(1), || 9u32).await.unwrap();
        assert_eq!((lookup.value, lookup.created), (7, false));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_refuses_new_peers() {
        let table = SessionTable::new(2, Duration::from_secs(60));
        table.get_or_insert_with(peer(1), || 1u32).await.unwrap();
        table.get_or_insert_with(peer(2), || 2u32).await.unwrap();

        assert!(matches!(
            table.get_or_insert_with(peer(3), || 3u32).await,
            Err(ProtocolError::TransportError(_))
        ));
        // known peers are still served
        assert!(table.get_or_insert_with(peer(1), || 0u32).await.is_ok());
        assert_eq!(table.stats().await.total_inserts, 2);
    }

    #[tokio::test]
    async fn test_idle_sessions_evicted() {
        let table = SessionTable::new(10, Duration::from_millis(20));
        table.get_or_insert_with(peer(1), || 1u32).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        table.get_or_insert_with(peer(2), || 2u32).await.unwrap();

        assert_eq!(table.evict_stale().await, vec![peer(1)]);
        assert!(table.get(&peer(1)).await.is_none());
        assert_eq!(table.get(&peer(2)).await, Some(2));
        assert_eq!(table.stats().await.total_evictions, 1);
    }

    #[tokio::test]
    async fn test_lookups_do_not_keep_a_session_alive() {
        let table = SessionTable::new(10, Duration::from_millis(40));
        table.get_or_insert_with(peer(1), || 1u32).await.unwrap();

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            table.get_or_insert_with(peer(1), || 0u32).await.unwrap();
        }
        assert_eq!(table.evict_stale().await, vec![peer(1)]);
    }

    #[tokio::test]
    async fn test_touch_restarts_idle_clock() {
        let table = SessionTable::new(10, Duration::from_millis(40));
        table.get_or_insert_with(peer(1), || 1u32).await.unwrap();

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(15)).await;
            assert!(table.touch(&peer(1)).await);
        }
        assert!(table.evict_stale().await.is_empty());
        assert!(!table.touch(&peer(2)).await);
    }

    #[tokio::test]
    async fn test_finished_sessions_evicted_before_idle() {
        let table = SessionTable::new(10, Duration::from_secs(60))
            .with_finished_check(|queue: &mpsc::Sender<u8>| queue.is_closed());
        let (live_tx, _live_rx) = mpsc::channel::<u8>(1);
        let (done_tx, done_rx) = mpsc::channel::<u8>(1);
        drop(done_rx);

        table.get_or_insert_with(peer(1), || live_tx).await.unwrap();
        table.get_or_insert_with(peer(2), || done_tx).await.unwrap();

        assert_eq!(table.evict_stale().await, vec![peer(2)]);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_full_table_makes_room_from_stale_sessions() {
        let table = SessionTable::new(1, Duration::from_millis(20));
        table.get_or_insert_with(peer(1), || 1u32).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let lookup = table.get_or_insert_with(peer(2), || 2u32).await.unwrap();
        assert_eq!((lookup.value, lookup.created), (2, true));
        assert_eq!(lookup.evicted, vec![peer(1)]);
        assert!(table.get(&peer(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let table = SessionTable::new(10, Duration::from_secs(60));
        table.get_or_insert_with(peer(1), || 1u32).await.unwrap();
        table.get_or_insert_with(peer(2), || 2u32).await.unwrap();

        assert_eq!(table.remove(&peer(1)).await, Some(1));
        assert_eq!(table.remove(&peer(1)).await, None);
        assert_eq!(table.clear().await, 1);
        assert!(table.is_empty().await);
    }
}
