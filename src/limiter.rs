//! Admission control against process resource budgets
//!
//! The limiter is pure logic: the caller collects the live process
//! samples (heap, CPU, network throughput) and feeds them in; the
//! limiter holds only the configured ceilings and answers whether new
//! work may be admitted. A rejection always names the specific budgets
//! that were exceeded, never just a boolean, so the caller can log and
//! alert precisely.
//!
//! # Example
//!
//! ```
//! use blebridge::limiter::{ResourceLimiter, LimiterConfig, ResourceSample, ResourceKind};
//!
//! let limiter = ResourceLimiter::new(LimiterConfig {
//!     max_memory_bytes: 100 * 1024 * 1024,
//!     ..Default::default()
//! }).unwrap();
//!
//! let decision = limiter.enforce(10, &ResourceSample {
//!     memory_bytes: 90 * 1024 * 1024, // 90% of the ceiling
//!     ..Default::default()
//! });
//!
//! assert!(!decision.allowed);
//! assert!(decision.violations.contains(&ResourceKind::Memory));
//! ```

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource budget categories reported in violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Connection-count budget
    Connections,
    /// Heap budget
    Memory,
    /// CPU budget
    Cpu,
    /// Network throughput budget
    Network,
}

impl ResourceKind {
    /// String representation
    pub fn as_str(&self) -> &str {
        match self {
            ResourceKind::Connections => "connections",
            ResourceKind::Memory => "memory",
            ResourceKind::Cpu => "cpu",
            ResourceKind::Network => "network",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configured ceilings and the admission threshold
#[derive(Debug, Clone)]
pub struct LimiterConfig {
    /// Maximum concurrent pooled connections
    pub max_connections: usize,
    /// Heap ceiling in bytes
    pub max_memory_bytes: u64,
    /// CPU ceiling as a percentage (0.0 - 100.0)
    pub max_cpu_pct: f64,
    /// Network throughput ceiling in bytes/sec
    pub max_network_bps: u64,
    /// Fraction of a ceiling at which admission is refused.
    ///
    /// Refusing before the absolute ceiling leaves headroom for work
    /// already in flight.
    pub admission_threshold: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_memory_bytes: 512 * 1024 * 1024,
            max_cpu_pct: 90.0,
            max_network_bps: 10_000_000,
            admission_threshold: 0.85,
        }
    }
}

impl LimiterConfig {
    /// Validate field values, rejecting degenerate settings eagerly
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.max_connections == 0 {
            return Err(BridgeError::InvalidConfig {
                field: "max_connections",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_memory_bytes == 0 {
            return Err(BridgeError::InvalidConfig {
                field: "max_memory_bytes",
                reason: "must be positive".to_string(),
            });
        }
        if !(self.max_cpu_pct > 0.0 && self.max_cpu_pct <= 100.0) {
            return Err(BridgeError::InvalidConfig {
                field: "max_cpu_pct",
                reason: "must be within (0, 100]".to_string(),
            });
        }
        if self.max_network_bps == 0 {
            return Err(BridgeError::InvalidConfig {
                field: "max_network_bps",
                reason: "must be positive".to_string(),
            });
        }
        if !(self.admission_threshold > 0.0 && self.admission_threshold <= 1.0) {
            return Err(BridgeError::InvalidConfig {
                field: "admission_threshold",
                reason: "must be within (0, 1]".to_string(),
            });
        }
        Ok(())
    }
}

/// A point-in-time snapshot of process resource usage.
///
/// No history is kept; each admission decision reads the most recent
/// sample the caller collected.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSample {
    /// Current heap usage in bytes
    pub memory_bytes: u64,
    /// Current CPU usage as a percentage (0.0 - 100.0)
    pub cpu_pct: f64,
    /// Current network throughput in bytes/sec
    pub network_bps: u64,
}

/// Outcome of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitDecision {
    /// Whether the request may be admitted
    pub allowed: bool,
    /// The specific budgets that were exceeded (empty when allowed)
    pub violations: Vec<ResourceKind>,
}

impl LimitDecision {
    /// Convert into a typed error carrying the violation list
    pub fn into_result(self) -> Result<(), BridgeError> {
        if self.allowed {
            Ok(())
        } else {
            Err(BridgeError::LimitsExceeded {
                violations: self.violations,
            })
        }
    }
}

/// Stateless admission checks against configured budgets.
#[derive(Debug, Clone)]
pub struct ResourceLimiter {
    config: LimiterConfig,
}

impl ResourceLimiter {
    /// Create a new limiter, validating the configuration eagerly
    pub fn new(config: LimiterConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The configured ceilings
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Whether another connection fits the count budget
    pub fn can_accept_connection(&self, current_count: usize) -> bool {
        current_count < self.config.max_connections
    }

    /// Whether heap usage is within budget
    pub fn check_memory_usage(&self, sample: &ResourceSample) -> bool {
        (sample.memory_bytes as f64)
            < self.config.max_memory_bytes as f64 * self.config.admission_threshold
    }

    /// Whether CPU usage is within budget
    pub fn check_cpu_usage(&self, sample: &ResourceSample) -> bool {
        sample.cpu_pct < self.config.max_cpu_pct * self.config.admission_threshold
    }

    /// Whether network throughput is within budget
    pub fn check_network_usage(&self, sample: &ResourceSample) -> bool {
        (sample.network_bps as f64)
            < self.config.max_network_bps as f64 * self.config.admission_threshold
    }

    /// Aggregate admission check.
    ///
    /// Every budget is evaluated; the decision lists all exceeded
    /// categories so one rejection reports the full picture.
    pub fn enforce(&self, current_connections: usize, sample: &ResourceSample) -> LimitDecision {
        let mut violations = Vec::new();

        if !self.can_accept_connection(current_connections) {
            violations.push(ResourceKind::Connections);
        }
        if !self.check_memory_usage(sample) {
            violations.push(ResourceKind::Memory);
        }
        if !self.check_cpu_usage(sample) {
            violations.push(ResourceKind::Cpu);
        }
        if !self.check_network_usage(sample) {
            violations.push(ResourceKind::Network);
        }

        LimitDecision {
            allowed: violations.is_empty(),
            violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_count_budget() {
        let limiter = ResourceLimiter::new(LimiterConfig {
            max_connections: 10,
            ..Default::default()
        })
        .unwrap();

        assert!(limiter.can_accept_connection(0));
        assert!(limiter.can_accept_connection(9));
        assert!(!limiter.can_accept_connection(10));
        assert!(!limiter.can_accept_connection(11));
    }

    #[test]
    fn test_memory_at_ninety_pct_of_ceiling_is_rejected() {
        let limiter = ResourceLimiter::new(LimiterConfig {
            max_memory_bytes: 100 * 1024 * 1024,
            ..Default::default()
        })
        .unwrap();

        let decision = limiter.enforce(
            0,
            &ResourceSample {
                memory_bytes: 90 * 1024 * 1024,
                ..Default::default()
            },
        );

        assert!(!decision.allowed);
        assert!(decision.violations.contains(&ResourceKind::Memory));
        assert_eq!(decision.violations.len(), 1);
    }

    #[test]
    fn test_memory_below_threshold_is_admitted() {
        let limiter = ResourceLimiter::new(LimiterConfig {
            max_memory_bytes: 100 * 1024 * 1024,
            admission_threshold: 0.85,
            ..Default::default()
        })
        .unwrap();

        let sample = ResourceSample {
            memory_bytes: 80 * 1024 * 1024,
            ..Default::default()
        };
        assert!(limiter.check_memory_usage(&sample));
        assert!(limiter.enforce(0, &sample).allowed);
    }

    #[test]
    fn test_all_violations_reported_together() {
        let limiter = ResourceLimiter::new(LimiterConfig {
            max_connections: 5,
            max_memory_bytes: 1024,
            max_cpu_pct: 50.0,
            max_network_bps: 1000,
            admission_threshold: 0.8,
        })
        .unwrap();

        let decision = limiter.enforce(
            5,
            &ResourceSample {
                memory_bytes: 2048,
                cpu_pct: 80.0,
                network_bps: 5000,
            },
        );

        assert!(!decision.allowed);
        assert_eq!(
            decision.violations,
            vec![
                ResourceKind::Connections,
                ResourceKind::Memory,
                ResourceKind::Cpu,
                ResourceKind::Network,
            ]
        );
    }

    #[test]
    fn test_into_result_carries_violations() {
        let limiter = ResourceLimiter::new(LimiterConfig {
            max_connections: 1,
            ..Default::default()
        })
        .unwrap();

        let err = limiter
            .enforce(1, &ResourceSample::default())
            .into_result()
            .unwrap_err();

        match err {
            BridgeError::LimitsExceeded { violations } => {
                assert_eq!(violations, vec![ResourceKind::Connections]);
            }
            other => panic!("expected LimitsExceeded, got {:?}", other),
        }
    }

    #[test]
    fn test_idle_sample_is_admitted() {
        let limiter = ResourceLimiter::new(LimiterConfig::default()).unwrap();
        let decision = limiter.enforce(0, &ResourceSample::default());
        assert!(decision.allowed);
        assert!(decision.violations.is_empty());
    }

    #[test]
    fn test_config_validation() {
        assert!(LimiterConfig::default().validate().is_ok());

        let bad = LimiterConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = LimiterConfig {
            admission_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(BridgeError::InvalidConfig { field: "admission_threshold", .. })
        ));

        let bad = LimiterConfig {
            max_cpu_pct: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_resource_kind_serde() {
        let json = serde_json::to_string(&ResourceKind::Memory).unwrap();
        assert_eq!(json, "\"memory\"");
        let back: ResourceKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ResourceKind::Memory);
    }
}
