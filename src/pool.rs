//! Bounded, priority-aware connection pool
//!
//! The pool owns the canonical set of [`Connection`] records and is the
//! single source of truth for membership: every connection is in exactly
//! one of the `available` / `in_use` sets while open, and in neither
//! once closed. Size stays within `[min_size, max_size]` except
//! transiently during a validation pass.
//!
//! Acquisition prefers an exact priority match among available
//! connections, falls back to any available connection (re-tagging it
//! with the requested tier), and creates a new connection only while
//! below `max_size`; beyond that the caller gets a capacity error, not
//! a queue. When utilization crosses `load_balance_threshold` the pool
//! proactively grows ahead of demand.
//!
//! # Example
//! ```no_run
//! use blebridge::{ConnectionPool, PoolConfig, ConnectionFactory, DeviceTransport, Priority, BridgeError};
//! use std::sync::Arc;
//!
//! # struct AdapterFactory;
//! # #[async_trait::async_trait]
//! # impl ConnectionFactory for AdapterFactory {
//! #     async fn create(&self) -> Result<Arc<dyn DeviceTransport>, BridgeError> {
//! #         unimplemented!()
//! #     }
//! # }
//! # async fn example() -> Result<(), BridgeError> {
//! let pool = ConnectionPool::new(Arc::new(AdapterFactory), PoolConfig::default())?;
//! pool.initialize().await?;
//!
//! let conn = pool.acquire(Priority::High).await?;
//! // ... use the connection ...
//! pool.release(&conn.id).await?;
//! # Ok(())
//! # }
//! ```

use crate::connection::{Connection, ConnectionFactory, ConnectionStatus, Priority};
use crate::error::BridgeError;
use crate::metrics::{MetricsSink, NoopMetrics};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Configuration for pool sizing and maintenance
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections created at startup and maintained as the floor
    pub min_size: usize,
    /// Hard ceiling on pool size
    pub max_size: usize,
    /// Available connections idle longer than this are reclaimed
    pub idle_timeout: Duration,
    /// Deadline for creating a connection during acquire
    pub acquire_timeout: Duration,
    /// How often the background validator runs
    pub validation_interval: Duration,
    /// Utilization (`in_use / size`) above which the pool grows ahead
    /// of demand
    pub load_balance_threshold: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
            validation_interval: Duration::from_secs(60),
            load_balance_threshold: 0.8,
        }
    }
}

impl PoolConfig {
    /// Dense-sensor profile: many short-lived device sessions.
    ///
    /// Sized for bridges in front of sensor fleets where links are
    /// cheap to establish and churn constantly: a high ceiling, a warm
    /// floor, aggressive idle reclamation, and a fast creation
    /// deadline so a wedged adapter fails the acquire quickly.
    pub fn dense_sensor_profile() -> Self {
        Self {
            min_size: 8,
            max_size: 64,
            idle_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(2),
            validation_interval: Duration::from_secs(15),
            load_balance_threshold: 0.7,
        }
    }

    /// Long-session profile: few devices, hours-long sessions.
    ///
    /// Sized for bridges holding a handful of links that must not be
    /// churned: a small pool, long idle tolerance, and a patient
    /// creation deadline for slow pairing handshakes.
    pub fn long_session_profile() -> Self {
        Self {
            min_size: 1,
            max_size: 4,
            idle_timeout: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(120),
            validation_interval: Duration::from_secs(300),
            load_balance_threshold: 0.9,
        }
    }

    /// Validate field values, rejecting degenerate settings eagerly
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.max_size == 0 {
            return Err(BridgeError::InvalidConfig {
                field: "max_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.min_size > self.max_size {
            return Err(BridgeError::InvalidConfig {
                field: "min_size",
                reason: format!(
                    "must not exceed max_size ({} > {})",
                    self.min_size, self.max_size
                ),
            });
        }
        if self.idle_timeout.is_zero()
            || self.acquire_timeout.is_zero()
            || self.validation_interval.is_zero()
        {
            return Err(BridgeError::InvalidConfig {
                field: "timeouts",
                reason: "idle_timeout, acquire_timeout, and validation_interval must be positive"
                    .to_string(),
            });
        }
        if !(self.load_balance_threshold > 0.0 && self.load_balance_threshold <= 1.0) {
            return Err(BridgeError::InvalidConfig {
                field: "load_balance_threshold",
                reason: "must be within (0, 1]".to_string(),
            });
        }
        Ok(())
    }
}

/// Membership state. `connections` is the arena; `available` and
/// `in_use` are disjoint id sets over it. `reserved` counts in-flight
/// creations so capacity is never oversubscribed across await points.
struct PoolState {
    connections: HashMap<String, Connection>,
    available: HashSet<String>,
    in_use: HashSet<String>,
    reserved: usize,
}

impl PoolState {
    fn new() -> Self {
        Self {
            connections: HashMap::new(),
            available: HashSet::new(),
            in_use: HashSet::new(),
            reserved: 0,
        }
    }

    fn committed_size(&self) -> usize {
        self.connections.len() + self.reserved
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Idle connections ready to serve
    pub available: usize,
    /// Connections checked out by callers
    pub in_use: usize,
    /// Total open connections
    pub total: usize,
    /// Configured floor
    pub min_size: usize,
    /// Configured ceiling
    pub max_size: usize,
}

impl PoolStats {
    /// Fraction of open connections currently in use
    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.in_use as f64 / self.total as f64
        }
    }
}

/// Outcome of one validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Connections reclaimed for exceeding the idle timeout
    pub removed_idle: usize,
    /// Connections created to restore the floor
    pub created: usize,
    /// Least-recently-used connections evicted above the floor
    pub evicted: usize,
}

/// The bounded, priority-aware pool.
pub struct ConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    metrics: Arc<dyn MetricsSink>,
    state: Mutex<PoolState>,
    next_id: AtomicU64,
}

impl ConnectionPool {
    /// Create a new pool, validating the configuration eagerly.
    ///
    /// The pool starts empty; call [`initialize`](Self::initialize) to
    /// establish the floor.
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: PoolConfig) -> Result<Self, BridgeError> {
        Self::with_metrics(factory, config, Arc::new(NoopMetrics))
    }

    /// Create a new pool with a metrics sink attached
    pub fn with_metrics(
        factory: Arc<dyn ConnectionFactory>,
        config: PoolConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            metrics,
            state: Mutex::new(PoolState::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// The pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn assign_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("conn-{}", n)
    }

    /// Create one connection through the factory, bounded by
    /// `acquire_timeout` so a wedged adapter cannot hang the caller.
    async fn create_connection(&self, priority: Priority) -> Result<Connection, BridgeError> {
        let transport = tokio::time::timeout(self.config.acquire_timeout, self.factory.create())
            .await
            .map_err(|_| BridgeError::Timeout(self.config.acquire_timeout))??;
        Ok(Connection::new(self.assign_id(), transport, priority))
    }

    async fn close_quietly(&self, conn: &Connection) {
        if let Err(e) = conn.transport.disconnect().await {
            debug!(id = %conn.id, error = %e, "disconnect during reclaim failed");
        }
        if let Err(e) = conn.transport.cleanup().await {
            debug!(id = %conn.id, error = %e, "cleanup during reclaim failed");
        }
    }

    /// Establish the configured floor of connections.
    ///
    /// Atomic: either `min_size` connections become visible together,
    /// or none do; connections built before a failure are torn down
    /// and the error is surfaced.
    pub async fn initialize(&self) -> Result<(), BridgeError> {
        let needed = {
            let mut state = self.state.lock().await;
            let n = self
                .config
                .min_size
                .saturating_sub(state.committed_size());
            state.reserved += n;
            n
        };

        let mut created: Vec<Connection> = Vec::with_capacity(needed);
        for _ in 0..needed {
            match self.create_connection(Priority::default()).await {
                Ok(conn) => created.push(conn),
                Err(e) => {
                    for conn in &created {
                        self.close_quietly(conn).await;
                    }
                    let mut state = self.state.lock().await;
                    state.reserved -= needed;
                    error!(error = %e, "pool initialization failed, no partial pool retained");
                    return Err(e);
                }
            }
        }

        let mut state = self.state.lock().await;
        state.reserved -= needed;
        for conn in created {
            state.available.insert(conn.id.clone());
            state.connections.insert(conn.id.clone(), conn);
        }
        let size = state.connections.len();
        drop(state);

        info!(size, "connection pool initialized");
        self.metrics.gauge("pool_size", size as f64, &[]);
        Ok(())
    }

    /// Acquire a connection for the given priority tier.
    ///
    /// Prefers an exact priority match among available connections,
    /// then any available connection (re-tagged to the requested
    /// tier), then creates a new connection while below `max_size`.
    /// At capacity the caller gets [`BridgeError::PoolExhausted`]
    /// immediately; capacity errors are never retried internally.
    ///
    /// There is no cancellation path for an in-flight acquire; dropping
    /// the returned future mid-creation abandons the attempt at the
    /// next await point.
    pub async fn acquire(&self, priority: Priority) -> Result<Connection, BridgeError> {
        if let Err(e) = self.grow_if_loaded().await {
            warn!(error = %e, "proactive pool growth failed");
        }

        {
            let mut state = self.state.lock().await;

            let candidate = state
                .available
                .iter()
                .find(|id| {
                    state
                        .connections
                        .get(*id)
                        .map(|c| c.priority == priority)
                        .unwrap_or(false)
                })
                .cloned()
                .or_else(|| state.available.iter().next().cloned());

            if let Some(id) = candidate {
                state.available.remove(&id);
                if let Some(conn) = state.connections.get_mut(&id) {
                    conn.status = ConnectionStatus::InUse;
                    conn.priority = priority;
                    conn.touch();
                    let out = conn.clone();
                    state.in_use.insert(id.clone());
                    self.metrics
                        .counter("pool_acquire_total", 1, &[("outcome", "reused")]);
                    return Ok(out);
                }
            }

            if state.committed_size() >= self.config.max_size {
                self.metrics
                    .counter("pool_acquire_total", 1, &[("outcome", "exhausted")]);
                return Err(BridgeError::PoolExhausted);
            }
            // Reserve the slot before awaiting creation so interleaved
            // acquires cannot oversubscribe max_size.
            state.reserved += 1;
        }

        let created = self.create_connection(priority).await;

        let mut state = self.state.lock().await;
        state.reserved -= 1;
        match created {
            Ok(mut conn) => {
                conn.status = ConnectionStatus::InUse;
                state.in_use.insert(conn.id.clone());
                let out = conn.clone();
                state.connections.insert(conn.id.clone(), conn);
                drop(state);
                self.metrics
                    .counter("pool_acquire_total", 1, &[("outcome", "created")]);
                Ok(out)
            }
            Err(e) => {
                drop(state);
                self.metrics
                    .counter("pool_acquire_total", 1, &[("outcome", "failed")]);
                Err(e)
            }
        }
    }

    /// Return an in-use connection to the available set, stamping
    /// `last_used`.
    pub async fn release(&self, id: &str) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        if !state.connections.contains_key(id) {
            return Err(BridgeError::ConnectionNotFound(id.to_string()));
        }
        if !state.in_use.contains(id) {
            return Err(BridgeError::ConnectionNotInUse(id.to_string()));
        }
        state.in_use.remove(id);
        if let Some(conn) = state.connections.get_mut(id) {
            conn.status = ConnectionStatus::Available;
            conn.touch();
        }
        state.available.insert(id.to_string());
        debug!(id, "connection released");
        Ok(())
    }

    /// Remove a connection from the pool entirely and tear its
    /// transport down. Used when a connection is known-bad (failed
    /// liveness, forced timeout) rather than merely idle.
    pub async fn discard(&self, id: &str) -> Result<(), BridgeError> {
        let removed = {
            let mut state = self.state.lock().await;
            state.available.remove(id);
            state.in_use.remove(id);
            state.connections.remove(id)
        };
        match removed {
            Some(mut conn) => {
                conn.status = ConnectionStatus::Closed;
                self.close_quietly(&conn).await;
                debug!(id, "connection discarded");
                Ok(())
            }
            None => Err(BridgeError::ConnectionNotFound(id.to_string())),
        }
    }

    /// Grow ahead of demand when utilization crosses the threshold.
    async fn grow_if_loaded(&self) -> Result<usize, BridgeError> {
        let to_add = {
            let mut state = self.state.lock().await;
            let size = state.committed_size();
            if size == 0 {
                return Ok(0);
            }
            let utilization = state.in_use.len() as f64 / size as f64;
            if utilization <= self.config.load_balance_threshold {
                return Ok(0);
            }
            let target = ((size as f64 * 1.2).ceil() as usize).min(self.config.max_size);
            let n = target.saturating_sub(size);
            state.reserved += n;
            n
        };
        if to_add == 0 {
            return Ok(0);
        }

        debug!(to_add, "utilization above threshold, growing pool");
        let mut added = 0;
        for _ in 0..to_add {
            match self.create_connection(Priority::default()).await {
                Ok(conn) => {
                    let mut state = self.state.lock().await;
                    state.reserved -= 1;
                    state.available.insert(conn.id.clone());
                    state.connections.insert(conn.id.clone(), conn);
                    added += 1;
                }
                Err(e) => {
                    let mut state = self.state.lock().await;
                    state.reserved -= to_add - added;
                    return Err(e);
                }
            }
        }
        Ok(added)
    }

    /// Restore the floor after reclamation.
    async fn top_up(&self) -> Result<usize, BridgeError> {
        let mut created = 0;
        loop {
            let needs_one = {
                let mut state = self.state.lock().await;
                if state.committed_size() >= self.config.min_size {
                    false
                } else {
                    state.reserved += 1;
                    true
                }
            };
            if !needs_one {
                break;
            }
            match self.create_connection(Priority::default()).await {
                Ok(conn) => {
                    let mut state = self.state.lock().await;
                    state.reserved -= 1;
                    state.available.insert(conn.id.clone());
                    state.connections.insert(conn.id.clone(), conn);
                    created += 1;
                }
                Err(e) => {
                    let mut state = self.state.lock().await;
                    state.reserved -= 1;
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    /// One maintenance pass: reclaim idle-expired connections, restore
    /// the floor, then evict least-recently-used available connections
    /// down to the floor.
    pub async fn validate_connections(&self) -> Result<ValidationReport, BridgeError> {
        // Reclaim available connections idle past the deadline
        let expired: Vec<Connection> = {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state
                .available
                .iter()
                .filter(|id| {
                    state
                        .connections
                        .get(*id)
                        .map(|c| c.idle_for() > self.config.idle_timeout)
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            ids.iter()
                .filter_map(|id| {
                    state.available.remove(id);
                    state.connections.remove(id)
                })
                .collect()
        };
        for conn in &expired {
            debug!(id = %conn.id, idle_for = ?conn.idle_for(), "reclaiming idle connection");
            self.close_quietly(conn).await;
        }

        let created = self.top_up().await?;

        // Shed surplus: LRU-first among available, down to the floor
        let evicted: Vec<Connection> = {
            let mut state = self.state.lock().await;
            let mut excess = state
                .committed_size()
                .saturating_sub(self.config.min_size);
            let mut candidates: Vec<(String, Instant)> = state
                .available
                .iter()
                .filter_map(|id| state.connections.get(id).map(|c| (id.clone(), c.last_used)))
                .collect();
            candidates.sort_by_key(|(_, last_used)| *last_used);

            let mut out = Vec::new();
            for (id, _) in candidates {
                if excess == 0 {
                    break;
                }
                state.available.remove(&id);
                if let Some(conn) = state.connections.remove(&id) {
                    out.push(conn);
                    excess -= 1;
                }
            }
            out
        };
        for conn in &evicted {
            self.close_quietly(conn).await;
        }

        let report = ValidationReport {
            removed_idle: expired.len(),
            created,
            evicted: evicted.len(),
        };
        if report != ValidationReport::default() {
            info!(
                removed_idle = report.removed_idle,
                created = report.created,
                evicted = report.evicted,
                "validation pass complete"
            );
        }
        let stats = self.stats().await;
        self.metrics.gauge("pool_size", stats.total as f64, &[]);
        Ok(report)
    }

    /// Spawn the recurring validation loop.
    ///
    /// Takes a clone of the shared pool handle. Per-tick failures are
    /// logged and contained; the loop never stops on its own. Abort
    /// the returned handle during shutdown.
    pub fn spawn_validator(self: Arc<Self>) -> JoinHandle<()> {
        let pool = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.config.validation_interval);
            // The first tick fires immediately; maintenance should wait
            // one full interval.
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = pool.validate_connections().await {
                    warn!(error = %e, "validation pass failed");
                }
            }
        })
    }

    /// Snapshot of pool occupancy
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            available: state.available.len(),
            in_use: state.in_use.len(),
            total: state.connections.len(),
            min_size: self.config.min_size,
            max_size: self.config.max_size,
        }
    }

    /// Clone of every pooled connection record, for monitors that
    /// iterate the pool without holding its lock.
    pub async fn snapshot(&self) -> Vec<Connection> {
        let state = self.state.lock().await;
        state.connections.values().cloned().collect()
    }

    /// Clone of one connection record
    pub async fn get(&self, id: &str) -> Option<Connection> {
        let state = self.state.lock().await;
        state.connections.get(id).cloned()
    }

    /// Remove and return every connection, emptying the pool. The
    /// shutdown path uses this to take ownership of the membership set
    /// before teardown.
    pub async fn drain_all(&self) -> Vec<Connection> {
        let mut state = self.state.lock().await;
        state.available.clear();
        state.in_use.clear();
        state
            .connections
            .drain()
            .map(|(_, mut conn)| {
                conn.status = ConnectionStatus::Closed;
                conn
            })
            .collect()
    }
}
