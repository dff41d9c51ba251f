//! Active keep-alive pings for pooled connections
//!
//! Runs independently of the health monitor: where health checks ask
//! the probe policy for a verdict, keep-alive actively exercises the
//! link with `transport.ping()` on a fixed interval. Consecutive ping
//! failures are tracked per connection; once `max_ping_failures` is
//! reached the keep-alive loop for that connection stops itself.
//!
//! Start and stop are idempotent, and re-arming always aborts the prior
//! task for the id; the same no-duplicate-timers discipline as the
//! health monitor.

use crate::connection::Connection;
use crate::error::BridgeError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for keep-alive pinging
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// Interval between pings of a monitored connection
    pub ping_interval: Duration,
    /// Consecutive ping failures before keep-alive stops
    pub max_ping_failures: u32,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            max_ping_failures: 3,
        }
    }
}

impl KeepAliveConfig {
    /// Validate field values, rejecting degenerate settings eagerly
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.ping_interval.is_zero() {
            return Err(BridgeError::InvalidConfig {
                field: "ping_interval",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_ping_failures == 0 {
            return Err(BridgeError::InvalidConfig {
                field: "max_ping_failures",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Recurring per-connection keep-alive pings.
pub struct KeepAlive {
    config: KeepAliveConfig,
    failures: Arc<Mutex<HashMap<String, u32>>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl KeepAlive {
    /// Create a new keep-alive runner, validating the configuration
    /// eagerly
    pub fn new(config: KeepAliveConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            config,
            failures: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Start keep-alive pings for a connection.
    ///
    /// A duplicate request for an id with a live ping loop is a no-op
    /// with a warning.
    pub async fn start(&self, connection: Connection) {
        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = tasks.get(&connection.id) {
            if !existing.is_finished() {
                warn!(id = %connection.id, "keep-alive already running, ignoring duplicate request");
                return;
            }
        }

        let id = connection.id.clone();
        let failures = Arc::clone(&self.failures);
        let interval_duration = self.config.ping_interval;
        let max_failures = self.config.max_ping_failures;
        debug!(id = %id, "starting keep-alive");
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
            interval.tick().await;
            loop {
                interval.tick().await;
                match connection.transport.ping().await {
                    Ok(()) => {
                        let mut failures = failures.lock().await;
                        failures.insert(connection.id.clone(), 0);
                    }
                    Err(e) => {
                        let count = {
                            let mut failures = failures.lock().await;
                            let count = failures.entry(connection.id.clone()).or_insert(0);
                            *count += 1;
                            *count
                        };
                        warn!(
                            id = %connection.id,
                            failures = count,
                            error = %e,
                            "keep-alive ping failed"
                        );
                        if count >= max_failures {
                            warn!(
                                id = %connection.id,
                                "consecutive ping failures reached limit, stopping keep-alive"
                            );
                            break;
                        }
                    }
                }
            }
        });
        tasks.insert(id, handle);
    }

    /// Stop keep-alive pings for a connection. Idempotent: stopping an
    /// id without a ping loop is a no-op with a warning.
    pub async fn stop(&self, id: &str) {
        let mut tasks = self.tasks.lock().await;
        match tasks.remove(id) {
            Some(handle) => {
                handle.abort();
                debug!(id, "keep-alive stopped");
            }
            None => warn!(id, "stop requested for connection without keep-alive"),
        }
    }

    /// Stop every ping loop. Used during shutdown.
    pub async fn stop_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (id, handle) in tasks.drain() {
            handle.abort();
            debug!(id = %id, "keep-alive stopped");
        }
    }

    /// Consecutive ping failures recorded for a connection
    pub async fn failure_count(&self, id: &str) -> u32 {
        let failures = self.failures.lock().await;
        failures.get(id).copied().unwrap_or(0)
    }

    /// Whether a ping loop is currently live for this id
    pub async fn is_running(&self, id: &str) -> bool {
        let tasks = self.tasks.lock().await;
        tasks.get(id).map(|h| !h.is_finished()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{DeviceTransport, Priority};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct PingTransport {
        fail: AtomicBool,
        pings: AtomicU32,
    }

    impl PingTransport {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(fail),
                pings: AtomicU32::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl DeviceTransport for PingTransport {
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
            self.pings.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(BridgeError::Network("no response".to_string()))
            } else {
                Ok(())
            }
        }
        fn is_active(&self) -> bool {
            true
        }
    }

    fn keepalive(interval_ms: u64, max_failures: u32) -> KeepAlive {
        KeepAlive::new(KeepAliveConfig {
            ping_interval: Duration::from_millis(interval_ms),
            max_ping_failures: max_failures,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_pings_flow_on_interval() {
        let ka = keepalive(10, 3);
        let transport = PingTransport::new(false);
        let conn = Connection::new("conn-1", transport.clone(), Priority::Medium);

        ka.start(conn).await;
        tokio::time::sleep(Duration::from_millis(45)).await;
        ka.stop("conn-1").await;

        assert!(transport.pings.load(Ordering::SeqCst) >= 2);
        assert_eq!(ka.failure_count("conn-1").await, 0);
    }

    #[tokio::test]
    async fn test_stops_after_max_ping_failures() {
        let ka = keepalive(10, 2);
        let transport = PingTransport::new(true);
        let conn = Connection::new("conn-1", transport.clone(), Priority::Medium);

        ka.start(conn).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!ka.is_running("conn-1").await);
        assert_eq!(ka.failure_count("conn-1").await, 2);
        // The loop stopped pinging once the limit was hit
        assert_eq!(transport.pings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let ka = keepalive(10, 3);
        let transport = PingTransport::new(true);
        let conn = Connection::new("conn-1", transport.clone(), Priority::Medium);

        ka.start(conn).await;
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(ka.failure_count("conn-1").await >= 1);

        // Link recovers before the limit
        transport.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(ka.failure_count("conn-1").await, 0);
        assert!(ka.is_running("conn-1").await);

        ka.stop("conn-1").await;
    }

    #[tokio::test]
    async fn test_duplicate_start_is_noop() {
        let ka = keepalive(10, 3);
        let transport = PingTransport::new(false);
        let conn = Connection::new("conn-1", transport.clone(), Priority::Medium);

        ka.start(conn.clone()).await;
        ka.start(conn).await; // warns, does not double-ping
        assert!(ka.is_running("conn-1").await);

        ka.stop("conn-1").await;
    }

    #[tokio::test]
    async fn test_stop_without_loop_is_noop() {
        let ka = keepalive(10, 3);
        // Must not panic or error
        ka.stop("never-started").await;
        assert!(!ka.is_running("never-started").await);
    }

    #[tokio::test]
    async fn test_stop_all() {
        let ka = keepalive(10, 3);
        for i in 0..3 {
            let conn = Connection::new(
                format!("conn-{}", i),
                PingTransport::new(false),
                Priority::Medium,
            );
            ka.start(conn).await;
        }

        ka.stop_all().await;
        for i in 0..3 {
            assert!(!ka.is_running(&format!("conn-{}", i)).await);
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(KeepAliveConfig::default().validate().is_ok());

        let bad = KeepAliveConfig {
            ping_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = KeepAliveConfig {
            max_ping_failures: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
