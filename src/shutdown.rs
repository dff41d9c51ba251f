//! Graceful, quiescence-aware teardown
//!
//! Shutdown is two-phase. First the quiescence wait: poll on a fixed
//! interval until every pooled connection reports inactive, or the
//! `quiescence_timeout` elapses; the timeout is a typed error so the
//! operator can see that connections never drained. Then teardown:
//! every connection is disconnected and cleaned up, with per-connection
//! outcomes collected into a [`ShutdownReport`]. One failing transport
//! never aborts the remaining teardowns; shutdown always completes.
//!
//! [`shutdown_connection`](ConnectionShutdown::shutdown_connection) is
//! the single-connection primitive the bulk path reuses.

use crate::connection::Connection;
use crate::error::BridgeError;
use crate::health::HealthMonitor;
use crate::keepalive::KeepAlive;
use crate::pool::ConnectionPool;
use crate::timeout::TimeoutWatchdog;
use futures::future::join_all;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// How long to wait for connections to drain
    pub quiescence_timeout: Duration,
    /// Poll interval during the quiescence wait
    pub poll_interval: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            quiescence_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl ShutdownConfig {
    /// Validate field values, rejecting degenerate settings eagerly
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.quiescence_timeout.is_zero() {
            return Err(BridgeError::InvalidConfig {
                field: "quiescence_timeout",
                reason: "must be positive".to_string(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(BridgeError::InvalidConfig {
                field: "poll_interval",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Per-connection teardown result
#[derive(Debug)]
pub struct ShutdownOutcome {
    /// The connection that was torn down
    pub id: String,
    /// Result of the disconnect call
    pub disconnect: Result<(), BridgeError>,
    /// Result of the cleanup call
    pub cleanup: Result<(), BridgeError>,
}

impl ShutdownOutcome {
    /// Whether both teardown steps succeeded
    pub fn is_ok(&self) -> bool {
        self.disconnect.is_ok() && self.cleanup.is_ok()
    }
}

/// Collected result of a bulk shutdown
#[derive(Debug)]
pub struct ShutdownReport {
    /// Whether every connection drained before teardown began
    pub quiesced: bool,
    /// Per-connection outcomes, one entry per torn-down connection
    pub outcomes: Vec<ShutdownOutcome>,
}

impl ShutdownReport {
    /// Connections whose teardown failed in either step
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_ok()).count()
    }
}

/// Graceful shutdown coordinator.
pub struct ConnectionShutdown {
    config: ShutdownConfig,
}

impl ConnectionShutdown {
    /// Create a shutdown coordinator, validating the configuration
    /// eagerly
    pub fn new(config: ShutdownConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Tear down one connection: disconnect, then cleanup. Failures are
    /// logged and collected, never propagated; the bulk path must keep
    /// going.
    pub async fn shutdown_connection(&self, connection: &Connection) -> ShutdownOutcome {
        let disconnect = connection.transport.disconnect().await;
        if let Err(e) = &disconnect {
            warn!(id = %connection.id, error = %e, "disconnect failed during shutdown");
        }
        let cleanup = connection.transport.cleanup().await;
        if let Err(e) = &cleanup {
            warn!(id = %connection.id, error = %e, "cleanup failed during shutdown");
        }
        ShutdownOutcome {
            id: connection.id.clone(),
            disconnect,
            cleanup,
        }
    }

    /// Poll until every pooled connection reports inactive, or the
    /// quiescence deadline passes.
    pub async fn wait_for_quiescence(&self, pool: &ConnectionPool) -> Result<(), BridgeError> {
        let deadline = Instant::now() + self.config.quiescence_timeout;
        loop {
            let active = pool
                .snapshot()
                .await
                .iter()
                .filter(|c| c.is_active())
                .count();
            if active == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BridgeError::QuiescenceTimeout(
                    self.config.quiescence_timeout,
                ));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Two-phase bulk shutdown of every pooled connection.
    ///
    /// A quiescence timeout is logged and recorded in the report, and
    /// teardown proceeds regardless; shutdown always completes.
    pub async fn shutdown_all(&self, pool: &ConnectionPool) -> ShutdownReport {
        let quiesced = match self.wait_for_quiescence(pool).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "connections did not drain, forcing teardown");
                false
            }
        };

        let connections = pool.drain_all().await;
        let count = connections.len();
        let outcomes = join_all(
            connections
                .iter()
                .map(|conn| self.shutdown_connection(conn)),
        )
        .await;

        let report = ShutdownReport { quiesced, outcomes };
        if report.failures() > 0 {
            warn!(
                connections = count,
                failures = report.failures(),
                "shutdown complete with teardown failures"
            );
        } else {
            info!(connections = count, "shutdown complete");
        }
        report
    }

    /// Full-system shutdown: drain every background monitor, then run
    /// the two-phase connection teardown.
    pub async fn shutdown_system(
        &self,
        pool: &ConnectionPool,
        health: &HealthMonitor,
        keepalive: &KeepAlive,
        watchdog: &TimeoutWatchdog,
    ) -> ShutdownReport {
        info!("draining background monitors");
        health.stop_all().await;
        keepalive.stop_all().await;
        watchdog.clear_all().await;
        self.shutdown_all(pool).await
    }
}
