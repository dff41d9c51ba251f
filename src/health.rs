//! Periodic health probing of pooled connections
//!
//! One recurring probe task per monitored connection id. Each check
//! runs the injected [`HealthProbe`] (default policy: the connection is
//! healthy iff its transport reports activity), measures latency, and
//! updates that connection's [`HealthState`]. After `max_errors`
//! consecutive failures the monitor stops itself; whether to evict the
//! connection is the caller's decision, typically the pool validator's.
//!
//! Start and stop are idempotent: monitoring an already-monitored id
//! and stopping an unmonitored id are warn-level no-ops. Re-arming
//! always aborts the prior task for the id first, so rapid restarts can
//! never leave two probe loops running against one connection.

use crate::connection::Connection;
use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for health monitoring
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Interval between probes of a monitored connection
    pub check_interval: Duration,
    /// Consecutive probe failures before monitoring stops
    pub max_errors: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            max_errors: 3,
        }
    }
}

impl HealthConfig {
    /// Validate field values, rejecting degenerate settings eagerly
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.check_interval.is_zero() {
            return Err(BridgeError::InvalidConfig {
                field: "check_interval",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_errors == 0 {
            return Err(BridgeError::InvalidConfig {
                field: "max_errors",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Probe verdict for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Last probe passed
    Healthy,
    /// Last probe failed
    Unhealthy,
}

/// Observed health for one connection, keyed by id in the monitor
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Verdict of the most recent probe
    pub status: HealthStatus,
    /// When the most recent probe ran
    pub last_check: Option<Instant>,
    /// Latency of the most recent probe
    pub latency: Duration,
    /// Consecutive probe failures
    pub errors: u32,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_check: None,
            latency: Duration::ZERO,
            errors: 0,
        }
    }
}

/// Liveness verdict for a connection.
///
/// A probe may fail outright (adapter error, mid-disconnect race); a
/// failure is treated as an unhealthy verdict, never a panic.
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether the connection is currently healthy
    async fn is_healthy(&self, connection: &Connection) -> Result<bool, BridgeError>;
}

/// Default probe policy: healthy iff the transport reports activity.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveProbe;

#[async_trait::async_trait]
impl HealthProbe for ActiveProbe {
    async fn is_healthy(&self, connection: &Connection) -> Result<bool, BridgeError> {
        Ok(connection.is_active())
    }
}

/// Snapshot of monitor-wide state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthMonitorStats {
    /// Connections with a live probe task
    pub monitored: usize,
    /// Connections whose last probe failed
    pub unhealthy: usize,
}

/// One probe against a connection, updating its record in place.
async fn run_check(
    probe: &dyn HealthProbe,
    records: &Mutex<HashMap<String, HealthState>>,
    connection: &Connection,
) -> HealthState {
    let started = Instant::now();
    let healthy = match probe.is_healthy(connection).await {
        Ok(verdict) => verdict,
        Err(e) => {
            debug!(id = %connection.id, error = %e, "health probe errored, treating as unhealthy");
            false
        }
    };
    let latency = started.elapsed();

    let mut records = records.lock().await;
    let record = records.entry(connection.id.clone()).or_default();
    record.last_check = Some(Instant::now());
    record.latency = latency;
    if healthy {
        record.status = HealthStatus::Healthy;
        record.errors = 0;
    } else {
        record.status = HealthStatus::Unhealthy;
        record.errors += 1;
    }
    record.clone()
}

/// Recurring per-connection health probing.
pub struct HealthMonitor {
    config: HealthConfig,
    probe: Arc<dyn HealthProbe>,
    records: Arc<Mutex<HashMap<String, HealthState>>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Create a new monitor, validating the configuration eagerly
    pub fn new(probe: Arc<dyn HealthProbe>, config: HealthConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            config,
            probe,
            records: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(HashMap::new()),
        })
    }

    /// Run one probe against a connection and update its record.
    ///
    /// A probe error is an unhealthy verdict; mid-disconnect
    /// connections fail their probe rather than breaking the monitor.
    pub async fn check(&self, connection: &Connection) -> HealthState {
        run_check(self.probe.as_ref(), &self.records, connection).await
    }

    /// Start recurring probes for a connection.
    ///
    /// A duplicate request for an already-monitored id is a no-op with
    /// a warning. The probe loop stops itself once `max_errors`
    /// consecutive failures accumulate.
    pub async fn monitor(&self, connection: Connection) {
        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = tasks.get(&connection.id) {
            if !existing.is_finished() {
                warn!(id = %connection.id, "connection already monitored, ignoring duplicate request");
                return;
            }
            // A finished task is stale bookkeeping; fall through and
            // replace it.
        }

        let probe = Arc::clone(&self.probe);
        let records = Arc::clone(&self.records);
        let check_interval = self.config.check_interval;
        let max_errors = self.config.max_errors;
        let id = connection.id.clone();
        debug!(id = %id, "starting health monitoring");
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                let state = run_check(probe.as_ref(), &records, &connection).await;
                if state.errors >= max_errors {
                    warn!(
                        id = %connection.id,
                        errors = state.errors,
                        "consecutive health check failures reached limit, stopping monitor"
                    );
                    break;
                }
            }
        });
        tasks.insert(id, handle);
    }

    /// Stop recurring probes for a connection. Idempotent: stopping an
    /// unmonitored id is a no-op with a warning.
    pub async fn stop(&self, id: &str) {
        let mut tasks = self.tasks.lock().await;
        match tasks.remove(id) {
            Some(handle) => {
                handle.abort();
                debug!(id, "health monitoring stopped");
            }
            None => warn!(id, "stop requested for unmonitored connection"),
        }
    }

    /// Stop every probe task. Used during shutdown.
    pub async fn stop_all(&self) {
        let mut tasks = self.tasks.lock().await;
        for (id, handle) in tasks.drain() {
            handle.abort();
            debug!(id = %id, "health monitoring stopped");
        }
    }

    /// The recorded health state for a connection, if any probe ran
    pub async fn state(&self, id: &str) -> Option<HealthState> {
        let records = self.records.lock().await;
        records.get(id).cloned()
    }

    /// Whether a probe task is currently live for this id
    pub async fn is_monitored(&self, id: &str) -> bool {
        let tasks = self.tasks.lock().await;
        tasks.get(id).map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Snapshot of monitor-wide state
    pub async fn stats(&self) -> HealthMonitorStats {
        let monitored = {
            let tasks = self.tasks.lock().await;
            tasks.values().filter(|h| !h.is_finished()).count()
        };
        let records = self.records.lock().await;
        let unhealthy = records
            .values()
            .filter(|r| r.status == HealthStatus::Unhealthy)
            .count();
        HealthMonitorStats {
            monitored,
            unhealthy,
        }
    }
}
