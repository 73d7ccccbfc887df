//! Observability and Metrics
//!
//! Handshake counters for monitoring server health and attack pressure.
//!
//! Uses atomic counters for thread-safe metrics collection.

use crate::error::{Disposition, ProtocolError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Global metrics collector for handshake operations
#[derive(Debug)]
pub struct Metrics {
    /// Sessions created for new peers
    pub sessions_created: AtomicU64,
    /// Sessions currently tracked
    pub sessions_active: AtomicU64,
    /// Sessions removed after idling or finishing
    pub sessions_evicted: AtomicU64,
    /// Datagrams refused because the session table was full
    pub sessions_rejected: AtomicU64,
    /// Total datagrams received
    pub datagrams_received: AtomicU64,
    /// Total datagrams sent
    pub datagrams_sent: AtomicU64,
    /// Datagrams dropped without changing session state
    pub datagrams_dropped: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Handshakes that reached clientinit
    pub handshakes_completed: AtomicU64,
    /// Handshakes aborted by a session-fatal error
    pub handshakes_aborted: AtomicU64,
    /// Failed puzzle proofs
    pub puzzle_failures: AtomicU64,
    /// Failed signature proofs
    pub signature_failures: AtomicU64,
    /// AEAD tag mismatches
    pub decryption_failures: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            sessions_created: AtomicU64::new(0),
            sessions_active: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            sessions_rejected: AtomicU64::new(0),
            datagrams_received: AtomicU64::new(0),
            datagrams_sent: AtomicU64::new(0),
            datagrams_dropped: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            handshakes_completed: AtomicU64::new(0),
            handshakes_aborted: AtomicU64::new(0),
            puzzle_failures: AtomicU64::new(0),
            signature_failures: AtomicU64::new(0),
            decryption_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn session_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_evicted(&self) {
        self.sessions_evicted.fetch_add(1, Ordering::Relaxed);
        self.sessions_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a datagram received
    pub fn datagram_received(&self, byte_count: u64) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a datagram sent
    pub fn datagram_sent(&self, byte_count: u64) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn datagram_dropped(&self) {
        self.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handshake_completed(&self) {
        self.handshakes_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Classify a transition error into the matching counters.
    pub fn record_error(&self, err: &ProtocolError) {
        match err {
            ProtocolError::PuzzleVerificationFailed => {
                self.puzzle_failures.fetch_add(1, Ordering::Relaxed);
            }
            ProtocolError::SignatureVerificationFailed => {
                self.signature_failures.fetch_add(1, Ordering::Relaxed);
            }
            ProtocolError::DecryptionFailure => {
                self.decryption_failures.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        match err.disposition() {
            Disposition::DropDatagram => self.datagram_dropped(),
            Disposition::AbortSession | Disposition::Attack => {
                self.handshakes_aborted.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_created: self.sessions_created.load(Ordering::Relaxed),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            sessions_rejected: self.sessions_rejected.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            handshakes_completed: self.handshakes_completed.load(Ordering::Relaxed),
            handshakes_aborted: self.handshakes_aborted.load(Ordering::Relaxed),
            puzzle_failures: self.puzzle_failures.load(Ordering::Relaxed),
            signature_failures: self.signature_failures.load(Ordering::Relaxed),
            decryption_failures: self.decryption_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            sessions_created = snapshot.sessions_created,
            sessions_active = snapshot.sessions_active,
            sessions_evicted = snapshot.sessions_evicted,
            sessions_rejected = snapshot.sessions_rejected,
            datagrams_received = snapshot.datagrams_received,
            datagrams_sent = snapshot.datagrams_sent,
            datagrams_dropped = snapshot.datagrams_dropped,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            handshakes_completed = snapshot.handshakes_completed,
            handshakes_aborted = snapshot.handshakes_aborted,
            puzzle_failures = snapshot.puzzle_failures,
            signature_failures = snapshot.signature_failures,
            decryption_failures = snapshot.decryption_failures,
            uptime_seconds = snapshot.uptime_seconds,
            "Handshake metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_created: u64,
    pub sessions_active: u64,
    pub sessions_evicted: u64,
    pub sessions_rejected: u64,
    pub datagrams_received: u64,
    pub datagrams_sent: u64,
    pub datagrams_dropped: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub handshakes_completed: u64,
    pub handshakes_aborted: u64,
    pub puzzle_failures: u64,
    pub signature_failures: u64,
    pub decryption_failures: u64,
    pub uptime_seconds: u64,
}

static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}

/// Initialize metrics collection (call once at startup)
pub fn init_metrics() {
    let _ = global_metrics();
    info!("Metrics collection initialized");
}

/// Logs how long a scope took when dropped.
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
