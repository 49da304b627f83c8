//! Tunables for the engine, detector, validator and simulator.
//!
//! Every threshold is a named constant with a matching config field so a
//! deployment can override it from JSON without recompiling.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Active rule set cache lifetime
pub const DEFAULT_RULE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Per (rule, context) result cache lifetime
pub const DEFAULT_RESULT_CACHE_TTL: Duration = Duration::from_secs(10);
/// Rules evaluated concurrently per batch
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_CACHED_RESULTS: usize = 1000;
/// Capacity of the violation broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Both rules at or above this priority turn a contradiction critical
pub const CRITICAL_CONTRADICTION_PRIORITY: u32 = 10;
/// More overlaps than this make a condition conflict high severity
pub const HIGH_SEVERITY_OVERLAP_COUNT: usize = 2;

pub const HIGH_PRIORITY_WARNING: u32 = 20;
pub const MAX_CONDITIONS_WARNING: usize = 5;
pub const MAX_NOTIFY_ACTIONS_WARNING: usize = 3;
pub const NAME_MIN_LEN: usize = 3;
pub const NAME_MAX_LEN: usize = 100;
pub const DESCRIPTION_MAX_LEN: usize = 500;

pub const CRITICAL_VIOLATION_PRIORITY: u32 = 20;
pub const HIGH_VIOLATION_PRIORITY: u32 = 10;
pub const HIGH_IMPACT_DAYS: usize = 10;
pub const MEDIUM_IMPACT_DAYS: usize = 5;
/// Estimated workload percentage per violation of an affected user
pub const WORKLOAD_PER_VIOLATION: f64 = 7.5;
pub const WORKLOAD_CHANGE_CAP: f64 = 50.0;
pub const REPORT_TOP_USERS: usize = 5;

// ============================================================================
// Engine
// ============================================================================

/// Configuration for [`crate::engine::RuleEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lifetime of the cached active rule set
    #[serde(with = "duration_serde")]
    pub rule_cache_ttl: Duration,
    /// Lifetime of a cached evaluation result
    #[serde(with = "duration_serde")]
    pub result_cache_ttl: Duration,
    /// Maximum rules evaluated concurrently
    pub batch_size: usize,
    pub max_cached_results: usize,
    /// Whether evaluation results are cached at all
    pub enable_result_cache: bool,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rule_cache_ttl: DEFAULT_RULE_CACHE_TTL,
            result_cache_ttl: DEFAULT_RESULT_CACHE_TTL,
            batch_size: DEFAULT_BATCH_SIZE,
            max_cached_results: DEFAULT_MAX_CACHED_RESULTS,
            enable_result_cache: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_rule_cache_ttl(mut self, ttl: Duration) -> Self {
        self.rule_cache_ttl = ttl;
        self
    }

    pub fn with_result_cache_ttl(mut self, ttl: Duration) -> Self {
        self.result_cache_ttl = ttl;
        self
    }

    pub fn without_result_cache(mut self) -> Self {
        self.enable_result_cache = false;
        self
    }
}

// ============================================================================
// Conflict detection
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityThresholds {
    pub critical_contradiction_priority: u32,
    pub high_severity_overlap_count: usize,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            critical_contradiction_priority: CRITICAL_CONTRADICTION_PRIORITY,
            high_severity_overlap_count: HIGH_SEVERITY_OVERLAP_COUNT,
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    pub name_min_len: usize,
    pub name_max_len: usize,
    pub description_max_len: usize,
    pub high_priority_warning: u32,
    pub max_conditions_warning: usize,
    pub max_notify_actions_warning: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            name_min_len: NAME_MIN_LEN,
            name_max_len: NAME_MAX_LEN,
            description_max_len: DESCRIPTION_MAX_LEN,
            high_priority_warning: HIGH_PRIORITY_WARNING,
            max_conditions_warning: MAX_CONDITIONS_WARNING,
            max_notify_actions_warning: MAX_NOTIFY_ACTIONS_WARNING,
        }
    }
}

// ============================================================================
// Simulation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub critical_violation_priority: u32,
    pub high_violation_priority: u32,
    pub high_impact_days: usize,
    pub medium_impact_days: usize,
    pub workload_per_violation: f64,
    pub workload_change_cap: f64,
    pub report_top_users: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            critical_violation_priority: CRITICAL_VIOLATION_PRIORITY,
            high_violation_priority: HIGH_VIOLATION_PRIORITY,
            high_impact_days: HIGH_IMPACT_DAYS,
            medium_impact_days: MEDIUM_IMPACT_DAYS,
            workload_per_violation: WORKLOAD_PER_VIOLATION,
            workload_change_cap: WORKLOAD_CHANGE_CAP,
            report_top_users: REPORT_TOP_USERS,
        }
    }
}

/// Serialize `Duration` as whole milliseconds.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.rule_cache_ttl, Duration::from_secs(300));
        assert_eq!(config.batch_size, 10);
        assert!(config.enable_result_cache);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"batch_size": 4, "rule_cache_ttl": 1500}"#).unwrap();
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.rule_cache_ttl, Duration::from_millis(1500));
        assert_eq!(config.result_cache_ttl, DEFAULT_RESULT_CACHE_TTL);
    }

    #[test]
    fn test_batch_size_never_zero() {
        assert_eq!(EngineConfig::default().with_batch_size(0).batch_size, 1);
    }
}
