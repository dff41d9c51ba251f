//! Error types for the connection core
//!
//! Every failure surfaced by this crate is a named `BridgeError` variant,
//! so callers can branch on cause instead of matching message text. The
//! transport-level variants carry a closed [`ErrorClass`] tag decided at
//! the failure site; retryability is a property of the class, never
//! reconstructed from free text.

use crate::limiter::ResourceKind;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Closed classification of transport-level failures.
///
/// Produced at raise time by [`BridgeError::class`]. The retryability
/// mapping mirrors the operational taxonomy: network, resource, and
/// service failures are worth another attempt; authentication and
/// unclassified failures are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Connection drops, resets, refusals, timeouts
    Network,
    /// Credential and authorization failures
    Authentication,
    /// Memory/CPU/byte-budget pressure
    Resource,
    /// Downstream service or server-side failures
    Service,
    /// Anything that could not be classified at the failure site
    Unknown,
}

impl ErrorClass {
    /// Whether failures of this class are worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorClass::Network | ErrorClass::Resource | ErrorClass::Service
        )
    }

    /// String representation
    pub fn as_str(&self) -> &str {
        match self {
            ErrorClass::Network => "network",
            ErrorClass::Authentication => "authentication",
            ErrorClass::Resource => "resource",
            ErrorClass::Service => "service",
            ErrorClass::Unknown => "unknown",
        }
    }
}

/// Errors produced by the connection core
#[derive(Debug, Error, Clone)]
pub enum BridgeError {
    /// Circuit breaker is open, rejecting requests
    #[error("circuit breaker is open, rejecting requests")]
    CircuitOpen,

    /// Pool is at capacity with no available connections
    #[error("connection pool is exhausted, no available connections")]
    PoolExhausted,

    /// Admission control rejected the request
    #[error("resource limits exceeded: {violations:?}")]
    LimitsExceeded { violations: Vec<ResourceKind> },

    /// Failover attempt budget for a priority tier is spent
    #[error("maximum failover attempts ({attempts}) reached")]
    FailoverExhausted { attempts: u32 },

    /// Reconnect attempt budget for a connection is spent
    #[error("maximum retries ({attempts}) exceeded")]
    RetriesExhausted { attempts: u32 },

    /// Transport-level network failure (drop, reset, refusal)
    #[error("network error: {0}")]
    Network(String),

    /// Credential or authorization failure
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Resource pressure reported by the transport or platform
    #[error("resource error: {0}")]
    Resource(String),

    /// Downstream service failure
    #[error("service error: {0}")]
    Service(String),

    /// Operation exceeded its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Pool acquisition failed inside the failover path
    #[error("connection acquisition failed: {source}")]
    AcquisitionFailed {
        #[source]
        source: Box<BridgeError>,
    },

    /// Liveness verification failed for a freshly acquired connection
    #[error("connection health check failed for {id}")]
    HealthCheckFailed { id: String },

    /// The referenced connection is not in the pool
    #[error("connection {0} not found")]
    ConnectionNotFound(String),

    /// Release of a connection that is not currently checked out
    #[error("connection {0} is not in use")]
    ConnectionNotInUse(String),

    /// Connections never drained during graceful shutdown
    #[error("connections did not quiesce within {0:?}")]
    QuiescenceTimeout(Duration),

    /// A configuration field failed eager validation
    #[error("invalid configuration: {field}: {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: String,
    },

    /// Unclassified failure
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl BridgeError {
    /// Classify this error into the closed transport taxonomy.
    ///
    /// Structural and orchestration errors (pool state, breaker state,
    /// configuration) classify as `Unknown`; they are not transport
    /// failures and carry their own named conditions instead.
    pub fn class(&self) -> ErrorClass {
        match self {
            BridgeError::Network(_) | BridgeError::Timeout(_) => ErrorClass::Network,
            BridgeError::Authentication(_) => ErrorClass::Authentication,
            BridgeError::Resource(_) | BridgeError::LimitsExceeded { .. } => ErrorClass::Resource,
            BridgeError::Service(_) => ErrorClass::Service,
            _ => ErrorClass::Unknown,
        }
    }

    /// Whether a reconnect attempt is worthwhile for this error.
    ///
    /// Admission and capacity errors (`PoolExhausted`, `LimitsExceeded`,
    /// `FailoverExhausted`, `RetriesExhausted`) are surfaced to the
    /// caller synchronously and are never retried internally, whatever
    /// their class.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Network(_)
                | BridgeError::Resource(_)
                | BridgeError::Service(_)
                | BridgeError::Timeout(_)
        )
    }

    /// Whether this error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            BridgeError::Authentication(_)
                | BridgeError::Unknown(_)
                | BridgeError::CircuitOpen
                | BridgeError::InvalidConfig { .. }
                | BridgeError::ConnectionNotFound(_)
                | BridgeError::ConnectionNotInUse(_)
        )
    }

    /// Whether this error should count against a circuit breaker.
    ///
    /// Breaker rejections and capacity conditions must not feed back
    /// into the failure count, or an open circuit would keep itself
    /// open forever.
    pub fn should_trip_breaker(&self) -> bool {
        !matches!(
            self,
            BridgeError::CircuitOpen
                | BridgeError::PoolExhausted
                | BridgeError::LimitsExceeded { .. }
                | BridgeError::FailoverExhausted { .. }
                | BridgeError::InvalidConfig { .. }
        )
    }
}
