//! Failover orchestration over the pool, breaker, and health probe
//!
//! [`ConnectionFailover`] is the entry point callers actually use to
//! obtain a connection. One acquisition walks the full gauntlet:
//!
//! 1. circuit breaker gate for the priority tier: open circuits fail
//!    fast, the pool is never touched
//! 2. bounded per-tier failover attempts: a tier that keeps failing
//!    gets a distinct "attempts exhausted" condition
//! 3. admission control against the connection-count budget, when a
//!    limiter is attached
//! 4. pool acquisition: failures are wrapped as the distinct
//!    "acquisition failed" condition
//! 5. liveness verification through the health probe: an unhealthy
//!    (or erroring) verdict discards the connection and reports the
//!    distinct "health check failed" condition
//!
//! Success resets the tier's attempt counter and records a breaker
//! success. A background sweep independently probes pooled connections
//! on `health_check_interval`, feeding the breaker per tier.
//!
//! # Example
//! ```no_run
//! use blebridge::{
//!     CircuitBreaker, CircuitBreakerConfig, ConnectionFailover, ConnectionPool,
//!     FailoverConfig, PoolConfig, Priority, BridgeError,
//! };
//! use std::sync::Arc;
//!
//! # async fn example(pool: Arc<ConnectionPool>) -> Result<(), BridgeError> {
//! let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())?);
//! let failover = Arc::new(ConnectionFailover::new(
//!     pool,
//!     breaker,
//!     FailoverConfig::default(),
//! )?);
//!
//! let sweep = failover.clone().spawn_health_monitor();
//! let conn = failover.acquire(Priority::High).await?;
//! // ... use the connection, then release through the pool ...
//! # sweep.abort();
//! # Ok(())
//! # }
//! ```

use crate::circuit_breaker::CircuitBreaker;
use crate::connection::{Connection, Priority};
use crate::error::BridgeError;
use crate::health::{ActiveProbe, HealthProbe};
use crate::limiter::{ResourceKind, ResourceLimiter};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::pool::ConnectionPool;
use crate::retry::{RetryConfig, RetryPolicy};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for failover orchestration
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Failed acquisitions tolerated per priority tier before the tier
    /// reports exhaustion
    pub max_failover_attempts: u32,
    /// Interval of the background health sweep
    pub health_check_interval: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_failover_attempts: 3,
            health_check_interval: Duration::from_secs(30),
        }
    }
}

impl FailoverConfig {
    /// Validate field values, rejecting degenerate settings eagerly
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.max_failover_attempts == 0 {
            return Err(BridgeError::InvalidConfig {
                field: "max_failover_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.health_check_interval.is_zero() {
            return Err(BridgeError::InvalidConfig {
                field: "health_check_interval",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Failure bookkeeping for one priority tier
#[derive(Debug, Default, Clone, Copy)]
struct TierState {
    attempts: u32,
    last_failover: Option<Instant>,
}

/// The caller-facing acquisition orchestrator.
pub struct ConnectionFailover {
    config: FailoverConfig,
    pool: Arc<ConnectionPool>,
    breaker: Arc<CircuitBreaker>,
    probe: Arc<dyn HealthProbe>,
    retry: RetryPolicy,
    limiter: Option<Arc<ResourceLimiter>>,
    metrics: Arc<dyn MetricsSink>,
    tiers: Mutex<HashMap<Priority, TierState>>,
}

impl ConnectionFailover {
    /// Create a failover orchestrator with the default probe (transport
    /// activity), default backoff policy, no limiter, and no metrics.
    pub fn new(
        pool: Arc<ConnectionPool>,
        breaker: Arc<CircuitBreaker>,
        config: FailoverConfig,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            config,
            pool,
            breaker,
            probe: Arc::new(ActiveProbe),
            retry: RetryPolicy::new(RetryConfig::default())?,
            limiter: None,
            metrics: Arc::new(NoopMetrics),
            tiers: Mutex::new(HashMap::new()),
        })
    }

    /// Replace the liveness probe
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Attach admission control
    pub fn with_limiter(mut self, limiter: Arc<ResourceLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Replace the backoff policy used by
    /// [`acquire_with_retry`](Self::acquire_with_retry)
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Attach a metrics sink
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Current failover attempt count for a tier
    pub async fn attempts(&self, priority: Priority) -> u32 {
        let tiers = self.tiers.lock().await;
        tiers.get(&priority).map(|t| t.attempts).unwrap_or(0)
    }

    async fn note_failure(&self, priority: Priority) {
        let mut tiers = self.tiers.lock().await;
        let tier = tiers.entry(priority).or_default();
        tier.attempts += 1;
        tier.last_failover = Some(Instant::now());
    }

    async fn reset_tier(&self, priority: Priority) {
        let mut tiers = self.tiers.lock().await;
        tiers.remove(&priority);
    }

    /// Acquire a connection for a priority tier, with breaker, attempt,
    /// admission, and liveness gating.
    ///
    /// Each failure condition is distinct: [`BridgeError::CircuitOpen`],
    /// [`BridgeError::FailoverExhausted`], [`BridgeError::LimitsExceeded`],
    /// [`BridgeError::AcquisitionFailed`], and
    /// [`BridgeError::HealthCheckFailed`] never collapse into a generic
    /// error, so callers can branch on cause.
    pub async fn acquire(&self, priority: Priority) -> Result<Connection, BridgeError> {
        let key = priority.as_str();

        if !self.breaker.allow_request(key).await {
            debug!(tier = key, "circuit open, failing fast");
            self.metrics
                .counter("failover_rejected_total", 1, &[("reason", "circuit_open")]);
            return Err(BridgeError::CircuitOpen);
        }

        {
            let tiers = self.tiers.lock().await;
            if let Some(tier) = tiers.get(&priority) {
                if tier.attempts >= self.config.max_failover_attempts {
                    self.metrics.counter(
                        "failover_rejected_total",
                        1,
                        &[("reason", "attempts_exhausted")],
                    );
                    return Err(BridgeError::FailoverExhausted {
                        attempts: tier.attempts,
                    });
                }
            }
        }

        if let Some(limiter) = &self.limiter {
            let total = self.pool.stats().await.total;
            if !limiter.can_accept_connection(total) {
                self.metrics
                    .counter("failover_rejected_total", 1, &[("reason", "admission")]);
                return Err(BridgeError::LimitsExceeded {
                    violations: vec![ResourceKind::Connections],
                });
            }
        }

        let started = Instant::now();
        let connection = match self.pool.acquire(priority).await {
            Ok(conn) => conn,
            Err(e) => {
                self.note_failure(priority).await;
                if e.should_trip_breaker() {
                    self.breaker.record_failure(key).await;
                }
                self.metrics
                    .counter("failover_rejected_total", 1, &[("reason", "acquisition")]);
                return Err(BridgeError::AcquisitionFailed {
                    source: Box::new(e),
                });
            }
        };

        let healthy = match self.probe.is_healthy(&connection).await {
            Ok(verdict) => verdict,
            Err(e) => {
                debug!(id = %connection.id, error = %e, "health probe errored, treating as unhealthy");
                false
            }
        };
        if !healthy {
            self.note_failure(priority).await;
            self.breaker.record_failure(key).await;
            if let Err(e) = self.pool.discard(&connection.id).await {
                warn!(id = %connection.id, error = %e, "failed to discard unhealthy connection");
            }
            self.metrics
                .counter("failover_rejected_total", 1, &[("reason", "health")]);
            return Err(BridgeError::HealthCheckFailed {
                id: connection.id.clone(),
            });
        }

        self.reset_tier(priority).await;
        self.breaker.record_success(key).await;
        self.metrics.counter(
            "failover_acquired_total",
            1,
            &[("tier", key)],
        );
        self.metrics.histogram(
            "failover_acquire_latency_ms",
            started.elapsed().as_secs_f64() * 1000.0,
            &[("tier", key)],
        );
        Ok(connection)
    }

    /// Acquire with the deterministic backoff schedule layered across
    /// the bounded attempts.
    ///
    /// Gate conditions (open circuit, exhausted attempts, admission
    /// rejection) surface immediately; acquisition and liveness
    /// failures back off and retry until the tier's attempt budget
    /// runs out.
    pub async fn acquire_with_retry(&self, priority: Priority) -> Result<Connection, BridgeError> {
        let mut failures: u32 = 0;
        loop {
            match self.acquire(priority).await {
                Ok(conn) => return Ok(conn),
                Err(
                    e @ (BridgeError::CircuitOpen
                    | BridgeError::FailoverExhausted { .. }
                    | BridgeError::LimitsExceeded { .. }),
                ) => return Err(e),
                Err(e) => {
                    let delay = self.retry.delay_for(failures);
                    failures += 1;
                    debug!(
                        tier = priority.as_str(),
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "acquisition failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One background sweep: probe every pooled connection, feeding the
    /// breaker per tier. Public so tests can drive sweeps directly.
    pub async fn health_sweep(&self) {
        let connections = self.pool.snapshot().await;
        for connection in connections {
            let key = connection.priority.as_str();
            let healthy = match self.probe.is_healthy(&connection).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    debug!(id = %connection.id, error = %e, "sweep probe errored, treating as unhealthy");
                    false
                }
            };
            if healthy {
                self.breaker.record_success(key).await;
                self.reset_tier(connection.priority).await;
            } else {
                warn!(
                    id = %connection.id,
                    tier = key,
                    "pooled connection failed background health check"
                );
                self.breaker.record_failure(key).await;
            }
        }

        let stats = self.pool.stats().await;
        self.metrics
            .gauge("pool_available", stats.available as f64, &[]);
        self.metrics.gauge("pool_in_use", stats.in_use as f64, &[]);
    }

    /// Spawn the recurring background health sweep.
    ///
    /// Takes a clone of the shared orchestrator handle. Per-tick
    /// failures are contained; abort the returned handle during
    /// shutdown.
    pub fn spawn_health_monitor(self: Arc<Self>) -> JoinHandle<()> {
        let failover = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(failover.config.health_check_interval);
            interval.tick().await;
            loop {
                interval.tick().await;
                failover.health_sweep().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::connection::{ConnectionFactory, DeviceTransport};
    use crate::limiter::LimiterConfig;
    use crate::pool::PoolConfig;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct TestTransport {
        active: AtomicBool,
    }

    #[async_trait::async_trait]
    impl DeviceTransport for TestTransport {
        async fn connect(&self) -> Result<(), BridgeError> {
            Ok(())
        }
        async fn disconnect(&self) -> Result<(), BridgeError> {
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn cleanup(&self) -> Result<(), BridgeError> {
            Ok(())
        }
        async fn ping(&self) -> Result<(), BridgeError> {
            Ok(())
        }
        fn is_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }
    }

    struct TestFactory {
        created: AtomicU64,
        fail_first: u64,
        spawn_active: AtomicBool,
    }

    impl TestFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                created: AtomicU64::new(0),
                fail_first: 0,
                spawn_active: AtomicBool::new(true),
            })
        }

        fn failing_first(n: u64) -> Arc<Self> {
            Arc::new(Self {
                created: AtomicU64::new(0),
                fail_first: n,
                spawn_active: AtomicBool::new(true),
            })
        }

        fn spawning_inactive() -> Arc<Self> {
            Arc::new(Self {
                created: AtomicU64::new(0),
                fail_first: 0,
                spawn_active: AtomicBool::new(false),
            })
        }
    }

    #[async_trait::async_trait]
    impl ConnectionFactory for TestFactory {
        async fn create(&self) -> Result<Arc<dyn DeviceTransport>, BridgeError> {
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(BridgeError::Network("adapter unavailable".to_string()));
            }
            Ok(Arc::new(TestTransport {
                active: AtomicBool::new(self.spawn_active.load(Ordering::SeqCst)),
            }))
        }
    }

    fn pool_with(factory: Arc<TestFactory>, min: usize, max: usize) -> Arc<ConnectionPool> {
        Arc::new(
            ConnectionPool::new(
                factory,
                PoolConfig {
                    min_size: min,
                    max_size: max,
                    load_balance_threshold: 1.0,
                    ..Default::default()
                },
            )
            .unwrap(),
        )
    }

    fn breaker_with(threshold: u32) -> Arc<CircuitBreaker> {
        Arc::new(
            CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: threshold,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_resets_tier_and_breaker() {
        let pool = pool_with(TestFactory::new(), 1, 5);
        pool.initialize().await.unwrap();
        let breaker = breaker_with(5);
        let failover =
            ConnectionFailover::new(pool, breaker.clone(), FailoverConfig::default()).unwrap();

        let conn = failover.acquire(Priority::High).await.unwrap();
        assert_eq!(conn.priority, Priority::High);
        assert_eq!(failover.attempts(Priority::High).await, 0);
        assert_eq!(breaker.get_state("high").await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_touching_pool() {
        let factory = TestFactory::new();
        let pool = pool_with(factory.clone(), 0, 5);
        let breaker = breaker_with(1);
        breaker.record_failure("medium").await;

        let failover =
            ConnectionFailover::new(pool, breaker, FailoverConfig::default()).unwrap();

        let result = failover.acquire(Priority::Medium).await;
        assert!(matches!(result, Err(BridgeError::CircuitOpen)));
        // The pool never saw the request
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_acquisition_failure_is_wrapped_and_counted() {
        let pool = pool_with(TestFactory::failing_first(100), 0, 5);
        let breaker = breaker_with(10);
        let failover =
            ConnectionFailover::new(pool, breaker.clone(), FailoverConfig::default()).unwrap();

        let result = failover.acquire(Priority::Low).await;
        match result {
            Err(BridgeError::AcquisitionFailed { source }) => {
                assert!(matches!(*source, BridgeError::Network(_)));
            }
            other => panic!("expected AcquisitionFailed, got {:?}", other),
        }
        assert_eq!(failover.attempts(Priority::Low).await, 1);
        assert_eq!(breaker.failure_count("low").await, 1);
    }

    #[tokio::test]
    async fn test_attempts_exhaust_into_distinct_error() {
        let pool = pool_with(TestFactory::failing_first(100), 0, 5);
        let breaker = breaker_with(10);
        let failover = ConnectionFailover::new(
            pool,
            breaker,
            FailoverConfig {
                max_failover_attempts: 3,
                ..Default::default()
            },
        )
        .unwrap();

        for _ in 0..3 {
            let result = failover.acquire(Priority::Medium).await;
            assert!(matches!(result, Err(BridgeError::AcquisitionFailed { .. })));
        }
        assert_eq!(failover.attempts(Priority::Medium).await, 3);

        let result = failover.acquire(Priority::Medium).await;
        assert!(matches!(
            result,
            Err(BridgeError::FailoverExhausted { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_tiers_track_attempts_independently() {
        let pool = pool_with(TestFactory::failing_first(100), 0, 5);
        let breaker = breaker_with(10);
        let failover =
            ConnectionFailover::new(pool, breaker, FailoverConfig::default()).unwrap();

        let _ = failover.acquire(Priority::High).await;
        assert_eq!(failover.attempts(Priority::High).await, 1);
        assert_eq!(failover.attempts(Priority::Low).await, 0);
    }

    #[tokio::test]
    async fn test_failed_liveness_discards_connection() {
        let pool = pool_with(TestFactory::spawning_inactive(), 0, 5);
        let breaker = breaker_with(10);
        let failover =
            ConnectionFailover::new(pool.clone(), breaker.clone(), FailoverConfig::default())
                .unwrap();

        let result = failover.acquire(Priority::Medium).await;
        assert!(matches!(result, Err(BridgeError::HealthCheckFailed { .. })));
        assert_eq!(failover.attempts(Priority::Medium).await, 1);
        assert_eq!(breaker.failure_count("medium").await, 1);
        // The unhealthy connection did not go back to the pool
        assert_eq!(pool.stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_admission_rejection_names_the_budget() {
        let pool = pool_with(TestFactory::new(), 1, 5);
        pool.initialize().await.unwrap();
        let breaker = breaker_with(10);
        let limiter = Arc::new(
            ResourceLimiter::new(LimiterConfig {
                max_connections: 1,
                ..Default::default()
            })
            .unwrap(),
        );
        let failover = ConnectionFailover::new(pool, breaker, FailoverConfig::default())
            .unwrap()
            .with_limiter(limiter);

        let result = failover.acquire(Priority::Medium).await;
        match result {
            Err(BridgeError::LimitsExceeded { violations }) => {
                assert_eq!(violations, vec![ResourceKind::Connections]);
            }
            other => panic!("expected LimitsExceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_acquire_with_retry_recovers_from_transient_failures() {
        let factory = TestFactory::failing_first(2);
        let pool = pool_with(factory.clone(), 0, 5);
        let breaker = breaker_with(10);
        let failover = ConnectionFailover::new(pool, breaker, FailoverConfig::default())
            .unwrap()
            .with_retry_policy(fast_retry());

        let conn = failover.acquire_with_retry(Priority::Medium).await.unwrap();
        assert!(conn.is_active());
        // Two failed creates, then the successful third
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
        assert_eq!(failover.attempts(Priority::Medium).await, 0);
    }

    #[tokio::test]
    async fn test_acquire_with_retry_surfaces_gate_errors() {
        let pool = pool_with(TestFactory::new(), 0, 5);
        let breaker = breaker_with(1);
        breaker.record_failure("high").await;

        let failover = ConnectionFailover::new(pool, breaker, FailoverConfig::default())
            .unwrap()
            .with_retry_policy(fast_retry());

        let result = failover.acquire_with_retry(Priority::High).await;
        assert!(matches!(result, Err(BridgeError::CircuitOpen)));
    }

    #[tokio::test]
    async fn test_health_sweep_feeds_breaker_per_tier() {
        let pool = pool_with(TestFactory::new(), 0, 5);
        let breaker = breaker_with(1);
        let failover =
            ConnectionFailover::new(pool.clone(), breaker.clone(), FailoverConfig::default())
                .unwrap();

        let conn = failover.acquire(Priority::Medium).await.unwrap();
        failover.health_sweep().await;
        assert_eq!(breaker.get_state("medium").await, CircuitState::Closed);

        // The device drops; the next sweep trips the tier's breaker
        conn.transport.disconnect().await.unwrap();
        failover.health_sweep().await;
        assert_eq!(breaker.get_state("medium").await, CircuitState::Open);

        let result = failover.acquire(Priority::Medium).await;
        assert!(matches!(result, Err(BridgeError::CircuitOpen)));
    }

    #[test]
    fn test_config_validation() {
        assert!(FailoverConfig::default().validate().is_ok());

        let bad = FailoverConfig {
            max_failover_attempts: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = FailoverConfig {
            health_check_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
