//! Connection identity and the device transport seam
//!
//! A [`Connection`] is the unit everything else in this crate manages:
//! one pooled link to a downstream BLE device, identified by an opaque
//! id and carrying the transient state the pool tracks (status,
//! priority tier, timestamps, reconnect count). The actual radio I/O
//! hides behind the [`DeviceTransport`] trait; the pool creates
//! transports through a [`ConnectionFactory`].

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Priority tier used to bias acquisition and failover ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Latency-sensitive sessions (served first)
    High,
    /// Normal sessions
    Medium,
    /// Background/bulk sessions
    Low,
}

impl Priority {
    /// String representation
    pub fn as_str(&self) -> &str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Parse a tier name leniently.
    ///
    /// Unknown names fall back to `Medium`, the documented default for
    /// callers speaking the wire protocol, where an unrecognized tier
    /// must not fail the request.
    pub fn from_name(name: &str) -> Self {
        match name {
            "high" => Priority::High,
            "medium" => Priority::Medium,
            "low" => Priority::Low,
            other => {
                tracing::warn!(tier = other, "unknown priority tier, defaulting to medium");
                Priority::Medium
            }
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Idle in the pool, ready to be acquired
    Available,
    /// Checked out by a caller
    InUse,
    /// Removed from the pool; transport torn down
    Closed,
}

impl ConnectionStatus {
    /// String representation
    pub fn as_str(&self) -> &str {
        match self {
            ConnectionStatus::Available => "available",
            ConnectionStatus::InUse => "in_use",
            ConnectionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The downstream device link this crate manages.
///
/// Implementations wrap the actual BLE adapter calls. Every operation
/// is fallible; `is_active` is the cheap synchronous liveness signal
/// the default health policy and the shutdown quiescence poll read.
#[async_trait::async_trait]
pub trait DeviceTransport: Send + Sync {
    /// Establish (or re-establish) the link
    async fn connect(&self) -> Result<(), BridgeError>;

    /// Tear the link down
    async fn disconnect(&self) -> Result<(), BridgeError>;

    /// Release residual per-link resources after disconnect
    async fn cleanup(&self) -> Result<(), BridgeError>;

    /// Active liveness probe
    async fn ping(&self) -> Result<(), BridgeError>;

    /// Whether the link currently reports activity
    fn is_active(&self) -> bool;
}

/// Factory for new device transports.
///
/// The pool calls this when it grows; the factory owns addressing,
/// pairing, and whatever platform state a fresh link needs.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create and connect a new transport
    async fn create(&self) -> Result<Arc<dyn DeviceTransport>, BridgeError>;
}

/// Identity and transient state for one pooled connection.
///
/// The pool owns the canonical record; clones handed out by
/// `acquire` share the transport (`Arc`) but carry a snapshot of the
/// bookkeeping fields. Auxiliary per-connection state (health
/// observations, ping failures, watchdog timers) lives in the
/// component that owns it, keyed by `id`.
#[derive(Clone)]
pub struct Connection {
    /// Opaque unique id, assigned by the pool
    pub id: String,

    /// The device link
    pub transport: Arc<dyn DeviceTransport>,

    /// Current lifecycle status
    pub status: ConnectionStatus,

    /// Priority tier this connection is serving
    pub priority: Priority,

    /// When the connection was created
    pub created_at: Instant,

    /// When the connection last served a request
    pub last_used: Instant,

    /// Consecutive failed reconnect attempts
    pub retry_count: u32,
}

impl Connection {
    /// Create a new available connection record
    pub fn new(id: impl Into<String>, transport: Arc<dyn DeviceTransport>, priority: Priority) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            transport,
            status: ConnectionStatus::Available,
            priority,
            created_at: now,
            last_used: now,
            retry_count: 0,
        }
    }

    /// How long since this connection last served a request
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    /// Stamp `last_used` with the current time
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Whether the underlying link reports activity
    pub fn is_active(&self) -> bool {
        self.transport.is_active()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("status", &self.status)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("idle_for", &self.idle_for())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    #[async_trait::async_trait]
    impl DeviceTransport for NullTransport {
        async fn connect(&self) -> Result<(), BridgeError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), BridgeError> {
            Ok(())
        }
        async fn cleanup(&self) -> Result<(), BridgeError> {
            Ok(())
        }
        async fn ping(&self) -> Result<(), BridgeError> {
            Ok(())
        }
        fn is_active(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_priority_lenient_parse() {
        assert_eq!(Priority::from_name("high"), Priority::High);
        assert_eq!(Priority::from_name("medium"), Priority::Medium);
        assert_eq!(Priority::from_name("low"), Priority::Low);
        // Unknown tiers fall back to the documented default
        assert_eq!(Priority::from_name("urgent"), Priority::Medium);
        assert_eq!(Priority::from_name(""), Priority::Medium);
    }

    #[test]
    fn test_priority_default_is_medium() {
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn test_status_as_str() {
        assert_eq!(ConnectionStatus::Available.as_str(), "available");
        assert_eq!(ConnectionStatus::InUse.as_str(), "in_use");
        assert_eq!(ConnectionStatus::Closed.as_str(), "closed");
    }

    #[test]
    fn test_new_connection_defaults() {
        let conn = Connection::new("conn-1", Arc::new(NullTransport), Priority::High);
        assert_eq!(conn.id, "conn-1");
        assert_eq!(conn.status, ConnectionStatus::Available);
        assert_eq!(conn.priority, Priority::High);
        assert_eq!(conn.retry_count, 0);
        assert!(conn.is_active());
    }

    #[test]
    fn test_touch_updates_last_used() {
        let mut conn = Connection::new("conn-1", Arc::new(NullTransport), Priority::Medium);
        std::thread::sleep(Duration::from_millis(5));
        let idle_before = conn.idle_for();
        conn.touch();
        assert!(conn.idle_for() < idle_before);
    }

    #[test]
    fn test_serde_roundtrip_for_state_enums() {
        for priority in [Priority::High, Priority::Medium, Priority::Low] {
            let json = serde_json::to_string(&priority).unwrap();
            let back: Priority = serde_json::from_str(&json).unwrap();
            assert_eq!(priority, back);
        }

        let json = serde_json::to_string(&ConnectionStatus::InUse).unwrap();
        assert_eq!(json, "\"in_use\"");
    }
}
