//! Inactivity watchdog with timeout-triggered recovery
//!
//! Each watched connection gets one inactivity timer. When it expires
//! the connection is forcibly disconnected and cleaned up, and a
//! separate recovery timer is armed. The recovery expiry runs a second
//! disconnect + cleanup pass; it exists for the case where the first
//! teardown itself failed or left residual adapter state, and is the
//! self-healing half of the cycle, not a log event.
//!
//! Arming a timer for a connection that already has one pending always
//! aborts the prior timer first: no leaked timers, no double firings.
//! Callers re-arm with [`watch`](TimeoutWatchdog::watch) on every
//! activity, which is what makes the timer an inactivity deadline.

use crate::connection::Connection;
use crate::error::BridgeError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Configuration for the watchdog
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Inactivity deadline before forced disconnect
    pub timeout_duration: Duration,
    /// Delay before the recovery pass after a forced disconnect
    pub recovery_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            timeout_duration: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    /// Validate field values, rejecting degenerate settings eagerly
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.timeout_duration.is_zero() {
            return Err(BridgeError::InvalidConfig {
                field: "timeout_duration",
                reason: "must be positive".to_string(),
            });
        }
        if self.recovery_timeout.is_zero() {
            return Err(BridgeError::InvalidConfig {
                field: "recovery_timeout",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Pending timers for one watched connection
struct WatchEntry {
    inactivity: JoinHandle<()>,
    recovery: Option<JoinHandle<()>>,
}

/// Forced teardown on inactivity expiry, then arm the recovery pass.
async fn run_timeout(
    entries: Arc<Mutex<HashMap<String, WatchEntry>>>,
    timeouts: Arc<AtomicU64>,
    recovery_timeout: Duration,
    connection: Connection,
) {
    warn!(id = %connection.id, "connection inactive past deadline, forcing disconnect");
    timeouts.fetch_add(1, Ordering::Relaxed);

    if let Err(e) = connection.transport.disconnect().await {
        warn!(id = %connection.id, error = %e, "forced disconnect failed");
    }
    if let Err(e) = connection.transport.cleanup().await {
        warn!(id = %connection.id, error = %e, "cleanup after forced disconnect failed");
    }

    let id = connection.id.clone();
    let recovery_entries = Arc::clone(&entries);
    let recovery = tokio::spawn(async move {
        tokio::time::sleep(recovery_timeout).await;
        run_recovery(recovery_entries, connection).await;
    });

    let mut entries = entries.lock().await;
    match entries.get_mut(&id) {
        Some(entry) => {
            if let Some(prev) = entry.recovery.replace(recovery) {
                prev.abort();
            }
        }
        None => {
            // The watch was cleared during teardown; the recovery
            // pass is no longer wanted.
            recovery.abort();
        }
    }
}

/// Second disconnect + cleanup pass, covering residue from a failed
/// first attempt.
async fn run_recovery(
    entries: Arc<Mutex<HashMap<String, WatchEntry>>>,
    connection: Connection,
) {
    debug!(id = %connection.id, "running timeout recovery pass");
    if let Err(e) = connection.transport.disconnect().await {
        debug!(id = %connection.id, error = %e, "recovery disconnect failed");
    }
    if let Err(e) = connection.transport.cleanup().await {
        debug!(id = %connection.id, error = %e, "recovery cleanup failed");
    }

    let mut entries = entries.lock().await;
    entries.remove(&connection.id);
    info!(id = %connection.id, "timeout recovery complete");
}

/// Per-connection inactivity watchdog.
pub struct TimeoutWatchdog {
    config: TimeoutConfig,
    entries: Arc<Mutex<HashMap<String, WatchEntry>>>,
    timeouts: Arc<AtomicU64>,
}

impl TimeoutWatchdog {
    /// Create a new watchdog, validating the configuration eagerly
    pub fn new(config: TimeoutConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
            timeouts: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Arm (or re-arm) the inactivity timer for a connection.
    ///
    /// Any pending inactivity or recovery timer for the id is aborted
    /// first. Call this on every request the connection serves to push
    /// the deadline forward.
    pub async fn watch(&self, connection: Connection) {
        let mut entries = self.entries.lock().await;
        if let Some(prev) = entries.remove(&connection.id) {
            prev.inactivity.abort();
            if let Some(recovery) = prev.recovery {
                recovery.abort();
            }
            debug!(id = %connection.id, "replacing pending watchdog timers");
        }

        let timer_entries = Arc::clone(&self.entries);
        let timeouts = Arc::clone(&self.timeouts);
        let timeout_duration = self.config.timeout_duration;
        let recovery_timeout = self.config.recovery_timeout;
        let id = connection.id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout_duration).await;
            run_timeout(timer_entries, timeouts, recovery_timeout, connection).await;
        });
        entries.insert(id, WatchEntry {
            inactivity: handle,
            recovery: None,
        });
    }

    /// Cancel pending timers for a connection. Idempotent: clearing an
    /// unwatched id is a no-op with a warning.
    pub async fn clear(&self, id: &str) {
        let mut entries = self.entries.lock().await;
        match entries.remove(id) {
            Some(entry) => {
                entry.inactivity.abort();
                if let Some(recovery) = entry.recovery {
                    recovery.abort();
                }
                debug!(id, "watchdog timers cleared");
            }
            None => warn!(id, "clear requested for unwatched connection"),
        }
    }

    /// Cancel every pending timer. Used during shutdown.
    pub async fn clear_all(&self) {
        let mut entries = self.entries.lock().await;
        for (id, entry) in entries.drain() {
            entry.inactivity.abort();
            if let Some(recovery) = entry.recovery {
                recovery.abort();
            }
            debug!(id = %id, "watchdog timers cleared");
        }
    }

    /// How many inactivity deadlines have expired
    pub fn timeout_count(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    /// Whether the id has a pending inactivity or recovery timer
    pub async fn is_watched(&self, id: &str) -> bool {
        let entries = self.entries.lock().await;
        entries.contains_key(id)
    }
}
