// Error taxonomy for the rule engine.
//
// Validation problems are data (ValidationReport), not errors. Condition
// errors never leave the engine: they turn the affected rule into a failed
// result. Everything a caller can act on is a RuleEngineError.

use thiserror::Error;

use crate::match_clause::ConditionOperator;
use crate::rule_metadata::{RuleId, RuleStatus};
use crate::validator::ValidationReport;

/// Failures reported by a rule store backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Rule not found: {0}")]
    NotFound(RuleId),

    #[error("Rule already exists: {0}")]
    AlreadyExists(RuleId),

    #[error("Version conflict for rule {rule_id}: expected version {expected}, got {actual}")]
    VersionConflict {
        rule_id: RuleId,
        expected: u32,
        actual: u32,
    },

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Raised while evaluating a single condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Malformed operand for {operator}: {reason}")]
    MalformedOperand {
        operator: ConditionOperator,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum RuleEngineError {
    #[error("Conflict resolution failed: {0}")]
    ConflictResolution(String),

    #[error("Version {version} not found for rule {rule_id}")]
    VersionNotFound { rule_id: RuleId, version: u32 },

    #[error("Rule not found: {0}")]
    RuleNotFound(RuleId),

    #[error("Invalid transition for rule {rule_id}: {from} -> {to}")]
    InvalidTransition {
        rule_id: RuleId,
        from: RuleStatus,
        to: RuleStatus,
    },

    #[error("Template {template_id}: {reason}")]
    Template { template_id: String, reason: String },

    #[error("Validation failed: {}", .0.summary())]
    ValidationFailed(ValidationReport),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, RuleEngineError>;
