//! Reconnect policy with deterministic exponential backoff
//!
//! One [`RetryPolicy`] computes backoff delays and performs single
//! reconnect attempts against a connection's transport. The delay
//! schedule is `min(initial_delay * backoff_factor^n, max_delay)`:
//! exponential and deliberately jitter-free, so the schedule is a pure
//! function of the retry count and tests can assert exact delays.
//!
//! Whether an error is worth retrying at all is decided by its
//! [`ErrorClass`](crate::ErrorClass) tag, fixed at the failure site:
//! network, resource, and service failures retry; authentication and
//! unclassified failures do not.

use crate::connection::Connection;
use crate::error::BridgeError;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for reconnect backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum reconnect attempts per connection before giving up
    pub max_retries: u32,
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Cap on the computed delay
    pub max_delay: Duration,
    /// Multiplier applied per successive attempt
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Validate field values, rejecting degenerate settings eagerly
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.initial_delay.is_zero() {
            return Err(BridgeError::InvalidConfig {
                field: "initial_delay",
                reason: "must be positive".to_string(),
            });
        }
        if self.max_delay < self.initial_delay {
            return Err(BridgeError::InvalidConfig {
                field: "max_delay",
                reason: "must be at least initial_delay".to_string(),
            });
        }
        if self.backoff_factor < 1.0 {
            return Err(BridgeError::InvalidConfig {
                field: "backoff_factor",
                reason: "must be at least 1.0".to_string(),
            });
        }
        Ok(())
    }
}

/// Backoff schedule and single-attempt reconnect.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new policy, validating the configuration eagerly
    pub fn new(config: RetryConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configured attempt budget
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Backoff delay for the given retry count.
    ///
    /// `delay_for(0)` is `initial_delay`; each further count multiplies
    /// by `backoff_factor`, capped at `max_delay`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = self.config.backoff_factor.powi(retry_count as i32);
        let millis = (self.config.initial_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.config.max_delay)
    }

    /// Whether another reconnect attempt should be made for this
    /// connection after this error.
    pub fn should_retry(&self, error: &BridgeError, connection: &Connection) -> bool {
        error.is_retryable() && connection.retry_count < self.config.max_retries
    }

    /// Perform one reconnect attempt.
    ///
    /// Waits the computed backoff delay, then calls
    /// `transport.connect()`. Success resets the connection's retry
    /// count; failure increments it and propagates the error. A
    /// connection whose retry count has already reached the budget
    /// gets the distinct exhaustion condition without another attempt.
    pub async fn reconnect(&self, connection: &mut Connection) -> Result<(), BridgeError> {
        if connection.retry_count >= self.config.max_retries {
            return Err(BridgeError::RetriesExhausted {
                attempts: connection.retry_count,
            });
        }
        let delay = self.delay_for(connection.retry_count);
        debug!(
            id = %connection.id,
            attempt = connection.retry_count + 1,
            delay_ms = delay.as_millis() as u64,
            "waiting before reconnect attempt"
        );
        tokio::time::sleep(delay).await;

        match connection.transport.connect().await {
            Ok(()) => {
                connection.retry_count = 0;
                debug!(id = %connection.id, "reconnect succeeded");
                Ok(())
            }
            Err(e) => {
                connection.retry_count += 1;
                warn!(
                    id = %connection.id,
                    retry_count = connection.retry_count,
                    error = %e,
                    "reconnect attempt failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{DeviceTransport, Priority};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyTransport {
        connects: AtomicU32,
        fail: AtomicBool,
    }

    impl FlakyTransport {
        fn new(fail: bool) -> Self {
            Self {
                connects: AtomicU32::new(0),
                fail: AtomicBool::new(fail),
            }
        }
    }

    #[async_trait::async_trait]
    impl DeviceTransport for FlakyTransport {
        async fn connect(&self) -> Result<(), BridgeError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(BridgeError::Network("connection refused".to_string()))
            } else {
                Ok(())
            }
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

    fn policy(initial_ms: u64, max_ms: u64, factor: f64, max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            backoff_factor: factor,
        })
        .unwrap()
    }

    #[test]
    fn test_delay_schedule() {
        let policy = policy(100, 10_000, 2.0, 3);

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = policy(100, 500, 10.0, 3);

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        // 100 * 10 = 1000ms, capped
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(10), Duration::from_millis(500));
    }

    #[test]
    fn test_should_retry_respects_class_and_budget() {
        let policy = policy(1, 10, 2.0, 2);
        let mut conn = Connection::new(
            "conn-1",
            Arc::new(FlakyTransport::new(false)),
            Priority::Medium,
        );

        let network = BridgeError::Network("drop".to_string());
        let auth = BridgeError::Authentication("denied".to_string());

        assert!(policy.should_retry(&network, &conn));
        assert!(!policy.should_retry(&auth, &conn));

        conn.retry_count = 2;
        assert!(!policy.should_retry(&network, &conn));
    }

    #[tokio::test]
    async fn test_reconnect_success_resets_count() {
        let policy = policy(1, 10, 2.0, 3);
        let mut conn = Connection::new(
            "conn-1",
            Arc::new(FlakyTransport::new(false)),
            Priority::Medium,
        );
        conn.retry_count = 2;

        policy.reconnect(&mut conn).await.unwrap();
        assert_eq!(conn.retry_count, 0);
    }

    #[tokio::test]
    async fn test_reconnect_failure_increments_count() {
        let policy = policy(1, 10, 2.0, 3);
        let transport = Arc::new(FlakyTransport::new(true));
        let mut conn = Connection::new("conn-1", transport.clone(), Priority::Medium);

        let result = policy.reconnect(&mut conn).await;
        assert!(matches!(result, Err(BridgeError::Network(_))));
        assert_eq!(conn.retry_count, 1);

        let result = policy.reconnect(&mut conn).await;
        assert!(result.is_err());
        assert_eq!(conn.retry_count, 2);
        assert_eq!(transport.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reconnect_refuses_once_budget_is_spent() {
        let policy = policy(1, 10, 2.0, 2);
        let transport = Arc::new(FlakyTransport::new(true));
        let mut conn = Connection::new("conn-1", transport.clone(), Priority::Medium);
        conn.retry_count = 2;

        let result = policy.reconnect(&mut conn).await;
        assert!(matches!(
            result,
            Err(BridgeError::RetriesExhausted { attempts: 2 })
        ));
        // No attempt was made against the transport
        assert_eq!(transport.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reconnect_waits_the_scheduled_delay() {
        let policy = policy(30, 100, 2.0, 3);
        let mut conn = Connection::new(
            "conn-1",
            Arc::new(FlakyTransport::new(false)),
            Priority::Medium,
        );

        let start = std::time::Instant::now();
        policy.reconnect(&mut conn).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());

        let bad = RetryConfig {
            initial_delay: Duration::ZERO,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = RetryConfig {
            max_delay: Duration::from_millis(1),
            initial_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(BridgeError::InvalidConfig { field: "max_delay", .. })
        ));

        let bad = RetryConfig {
            backoff_factor: 0.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
