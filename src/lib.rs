//! blebridge: resilient device-connection core for BLE bridge servers
//!
//! # Overview
//!
//! This crate is the connection-lifecycle subsystem of a protocol
//! bridge that exposes BLE device operations over a persistent
//! message-based connection, multiplexing many logical client sessions
//! onto a bounded pool of downstream device links. It provides:
//!
//! - **Connection Pool**: bounded, priority-aware reuse of device links
//!   with idle reclamation and load-based growth
//! - **Circuit Breaker**: per-target failure gating so one failing
//!   device cannot poison the pool
//! - **Failover**: the bounded-attempt orchestration combining pool
//!   acquisition, breaker checks, and liveness verification
//! - **Retry**: deterministic exponential backoff and single-shot
//!   reconnects
//! - **Health / Keep-Alive**: recurring per-connection probing and
//!   active pings with consecutive-failure auto-stop
//! - **Timeout Watchdog**: inactivity deadlines with a self-healing
//!   recovery pass
//! - **Resource Limiter**: admission control against connection, heap,
//!   CPU, and network budgets
//! - **Shutdown**: two-phase quiescence wait and teardown with
//!   collected per-connection outcomes
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - The BLE radio and its platform bindings (behind [`DeviceTransport`])
//! - Wire-message encoding and schema validation
//! - Authentication, signing, and payload encryption
//! - Metrics and logging backends (behind [`MetricsSink`] and the
//!   `tracing` facade)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Bridge server (caller)           │
//! └─────────────┬───────────────────────────┘
//!               │ acquire(priority)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       ConnectionFailover                │  ← Orchestration
//! │  (breaker gate, bounded attempts,       │
//! │   admission, liveness verification)     │
//! └───────┬───────────────┬─────────────────┘
//!         │               │ consults
//!         ▼               ▼
//! ┌───────────────┐ ┌─────────────────────┐
//! │ConnectionPool │ │   CircuitBreaker    │  ← Fail-fast protection
//! │ (min/max size,│ │ (per-tier/per-id    │
//! │  priorities,  │ │  CLOSED/OPEN/       │
//! │  validation)  │ │  HALF_OPEN)         │
//! └───────┬───────┘ └─────────▲───────────┘
//!         │                   │ feeds
//!         ▼                   │
//! ┌─────────────────────────────────────────┐
//! │  HealthMonitor / KeepAlive / Watchdog   │  ← Background probing
//! │  (recurring per-connection timers)      │
//! └─────────────┬───────────────────────────┘
//!               │
//!               ▼
//!        DeviceTransport (BLE adapter)
//!
//!  On process stop:
//!   ConnectionShutdown → quiescence wait → teardown, outcomes collected
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use blebridge::prelude::*;
//! use std::sync::Arc;
//!
//! # struct AdapterFactory;
//! # #[async_trait::async_trait]
//! # impl ConnectionFactory for AdapterFactory {
//! #     async fn create(&self) -> Result<Arc<dyn DeviceTransport>> {
//! #         unimplemented!()
//! #     }
//! # }
//! # async fn example() -> Result<()> {
//! let pool = Arc::new(ConnectionPool::new(
//!     Arc::new(AdapterFactory),
//!     PoolConfig::default(),
//! )?);
//! pool.initialize().await?;
//! let validator = pool.clone().spawn_validator();
//!
//! let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())?);
//! let failover = Arc::new(ConnectionFailover::new(
//!     pool.clone(),
//!     breaker,
//!     FailoverConfig::default(),
//! )?);
//! let sweep = failover.clone().spawn_health_monitor();
//!
//! let conn = failover.acquire(Priority::High).await?;
//! // ... serve the session ...
//! pool.release(&conn.id).await?;
//!
//! // Graceful stop
//! sweep.abort();
//! validator.abort();
//! let shutdown = ConnectionShutdown::new(ShutdownConfig::default())?;
//! let report = shutdown.shutdown_all(&pool).await;
//! assert_eq!(report.failures(), 0);
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod connection;
pub mod error;
pub mod failover;
pub mod health;
pub mod keepalive;
pub mod limiter;
pub mod metrics;
pub mod pool;
pub mod retry;
pub mod shutdown;
pub mod timeout;

// Re-export main types for convenience
pub use circuit_breaker::{BreakerStats, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use connection::{
    Connection, ConnectionFactory, ConnectionStatus, DeviceTransport, Priority,
};
pub use error::{BridgeError, ErrorClass, Result};
pub use failover::{ConnectionFailover, FailoverConfig};
pub use health::{
    ActiveProbe, HealthConfig, HealthMonitor, HealthMonitorStats, HealthProbe, HealthState,
    HealthStatus,
};
pub use keepalive::{KeepAlive, KeepAliveConfig};
pub use limiter::{
    LimitDecision, LimiterConfig, ResourceKind, ResourceLimiter, ResourceSample,
};
pub use metrics::{MetricsSink, NoopMetrics, SharedMetrics};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, ValidationReport};
pub use retry::{RetryConfig, RetryPolicy};
pub use shutdown::{ConnectionShutdown, ShutdownConfig, ShutdownOutcome, ShutdownReport};
pub use timeout::{TimeoutConfig, TimeoutWatchdog};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use blebridge::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use super::connection::{
        Connection, ConnectionFactory, ConnectionStatus, DeviceTransport, Priority,
    };
    pub use super::error::{BridgeError, ErrorClass, Result};
    pub use super::failover::{ConnectionFailover, FailoverConfig};
    pub use super::health::{ActiveProbe, HealthConfig, HealthMonitor, HealthProbe};
    pub use super::keepalive::{KeepAlive, KeepAliveConfig};
    pub use super::limiter::{LimiterConfig, ResourceKind, ResourceLimiter, ResourceSample};
    pub use super::metrics::{MetricsSink, NoopMetrics};
    pub use super::pool::{ConnectionPool, PoolConfig, PoolStats};
    pub use super::retry::{RetryConfig, RetryPolicy};
    pub use super::shutdown::{ConnectionShutdown, ShutdownConfig, ShutdownReport};
    pub use super::timeout::{TimeoutConfig, TimeoutWatchdog};
}
