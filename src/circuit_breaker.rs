//! Keyed circuit breaker for fault isolation
//!
//! One breaker instance tracks many keys (connection ids or priority
//! tiers), so a single failing device cannot poison acquisition for the
//! whole pool. Each key moves through three states:
//! - Closed: normal operation, requests pass through
//! - Open: the target is unhealthy, requests fail immediately
//! - HalfOpen: the reset window elapsed, a bounded number of trial
//!   requests may probe for recovery
//!
//! The state is never stored. It is computed on read from the recorded
//! `{failure_count, last_failure, half_open_attempts}`, so the invariant
//! "state is a pure function of the counters and the clock" holds by
//! construction: OPEN iff the failure count reached the threshold and
//! the reset window has not elapsed; HALF_OPEN iff open-by-count but the
//! window elapsed; CLOSED otherwise.
//!
//! # Example
//! ```no_run
//! use blebridge::{CircuitBreaker, CircuitBreakerConfig, CircuitState, BridgeError};
//!
//! # async fn example() -> Result<(), BridgeError> {
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default())?;
//!
//! // Guarded execution: the operation is never invoked while open.
//! let result = breaker.execute("dev1", || async {
//!     Ok::<_, BridgeError>(42)
//! }).await?;
//!
//! assert_eq!(breaker.get_state("dev1").await, CircuitState::Closed);
//! # Ok(())
//! # }
//! ```

use crate::error::BridgeError;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// State of one breaker key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests pass through normally
    Closed,
    /// Requests fail immediately
    Open,
    /// Bounded trial requests probe for recovery
    HalfOpen,
}

impl CircuitState {
    /// String representation
    pub fn as_str(&self) -> &str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before a key's circuit opens
    pub failure_threshold: u32,
    /// How long a circuit stays open before allowing half-open trials
    pub reset_timeout: Duration,
    /// Maximum concurrent trial requests while half-open
    pub half_open_limit: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_limit: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validate field values, rejecting degenerate settings eagerly
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.failure_threshold == 0 {
            return Err(BridgeError::InvalidConfig {
                field: "failure_threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.reset_timeout.is_zero() {
            return Err(BridgeError::InvalidConfig {
                field: "reset_timeout",
                reason: "must be positive".to_string(),
            });
        }
        if self.half_open_limit == 0 {
            return Err(BridgeError::InvalidConfig {
                field: "half_open_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Recorded observations for one key. Created lazily on first record.
#[derive(Debug, Default)]
struct BreakerEntry {
    failure_count: u32,
    last_failure: Option<Instant>,
    half_open_attempts: u32,
}

impl BreakerEntry {
    fn state(&self, config: &CircuitBreakerConfig) -> CircuitState {
        if self.failure_count < config.failure_threshold {
            return CircuitState::Closed;
        }
        match self.last_failure {
            Some(at) if at.elapsed() > config.reset_timeout => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }
}

/// Snapshot of breaker-wide state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerStats {
    /// Keys with recorded observations
    pub tracked_keys: usize,
    /// Keys currently open
    pub open: usize,
    /// Keys currently in half-open probing
    pub half_open: usize,
}

/// Keyed circuit breaker.
///
/// Cheap to clone; clones share the same recorded state.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    entries: Arc<Mutex<HashMap<String, BreakerEntry>>>,
}

impl CircuitBreaker {
    /// Create a new breaker, validating the configuration eagerly
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            entries: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Current state for a key. Unknown keys are closed.
    pub async fn get_state(&self, key: &str) -> CircuitState {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .map(|e| e.state(&self.config))
            .unwrap_or(CircuitState::Closed)
    }

    /// Current failure count for a key
    pub async fn failure_count(&self, key: &str) -> u32 {
        let entries = self.entries.lock().await;
        entries.get(key).map(|e| e.failure_count).unwrap_or(0)
    }

    /// Whether a request against this key may proceed.
    ///
    /// While half-open, each positive answer consumes one of the
    /// `half_open_limit` trial slots; the slot is returned when the
    /// trial's outcome is recorded.
    pub async fn allow_request(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(key) else {
            return true;
        };
        match entry.state(&self.config) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if entry.half_open_attempts < self.config.half_open_limit {
                    entry.half_open_attempts += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a failed operation against a key.
    ///
    /// A failure while half-open re-opens the circuit with a fresh
    /// reset window.
    pub async fn record_failure(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.to_string()).or_default();
        match entry.state(&self.config) {
            CircuitState::Closed => {
                entry.failure_count += 1;
                entry.last_failure = Some(Instant::now());
                if entry.state(&self.config) == CircuitState::Open {
                    debug!(key, failures = entry.failure_count, "circuit opened");
                }
            }
            CircuitState::HalfOpen => {
                entry.last_failure = Some(Instant::now());
                entry.half_open_attempts = 0;
                debug!(key, "half-open trial failed, circuit re-opened");
            }
            CircuitState::Open => {
                entry.last_failure = Some(Instant::now());
            }
        }
    }

    /// Record a successful operation against a key.
    ///
    /// Success closes a half-open circuit and resets the failure count.
    pub async fn record_success(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(key.to_string()).or_default();
        let was_half_open = entry.state(&self.config) == CircuitState::HalfOpen;
        entry.failure_count = 0;
        entry.last_failure = None;
        entry.half_open_attempts = 0;
        if was_half_open {
            debug!(key, "half-open trial succeeded, circuit closed");
        }
    }

    /// Execute an operation under breaker protection.
    ///
    /// Fails immediately with [`BridgeError::CircuitOpen`] when the key's
    /// circuit is open; the operation is never invoked. Otherwise the
    /// outcome is recorded and the operation's error is propagated to
    /// the caller unchanged.
    pub async fn execute<F, Fut, T>(&self, key: &str, op: F) -> Result<T, BridgeError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, BridgeError>>,
    {
        if !self.allow_request(key).await {
            return Err(BridgeError::CircuitOpen);
        }

        match op().await {
            Ok(value) => {
                self.record_success(key).await;
                Ok(value)
            }
            Err(e) => {
                if e.should_trip_breaker() {
                    self.record_failure(key).await;
                } else {
                    // Return the half-open trial slot consumed by
                    // allow_request; this outcome says nothing about
                    // the target's health.
                    let mut entries = self.entries.lock().await;
                    if let Some(entry) = entries.get_mut(key) {
                        entry.half_open_attempts = entry.half_open_attempts.saturating_sub(1);
                    }
                }
                Err(e)
            }
        }
    }

    /// Forget all recorded observations for a key
    pub async fn reset(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
    }

    /// Snapshot of per-key states
    pub async fn stats(&self) -> BreakerStats {
        let entries = self.entries.lock().await;
        let mut open = 0;
        let mut half_open = 0;
        for entry in entries.values() {
            match entry.state(&self.config) {
                CircuitState::Open => open += 1,
                CircuitState::HalfOpen => half_open += 1,
                CircuitState::Closed => {}
            }
        }
        BreakerStats {
            tracked_keys: entries.len(),
            open,
            half_open,
        }
    }
}
