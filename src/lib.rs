pub mod rule_metadata;
pub mod match_clause;
pub mod action_clause;
pub mod config;
pub mod error;
pub mod audit_record;
pub mod store;
pub mod rule_table;
pub mod notification;
pub mod engine;
pub mod conflict;
pub mod validator;
pub mod template;
pub mod diff;
pub mod versioning;
pub mod lifecycle;
pub mod simulator;

pub use rule_metadata::{
    Rule, RuleBuilder, RuleException, RuleId, RuleMetrics, RuleStatus, RuleType,
};

pub use match_clause::{
    Condition, ConditionGroup, ConditionOperator, CustomFunction, CustomFunctionRegistry,
    EvaluationContext, EvaluationPurpose, LogicalOperator,
};

pub use action_clause::{
    notification_severity, Action, ActionResult, ActionType, NotificationSeverity,
    NOTIFY_PRIORITIES,
};

pub use config::{EngineConfig, SeverityThresholds, SimulationConfig, ValidationLimits};

pub use error::{ConditionError, Result, RuleEngineError, StoreError};

pub use audit_record::{ActivityAction, ActivityLogEntry, EntityType};

pub use store::{InMemoryRuleStore, RuleFilter, RuleStore};

pub use rule_table::{ResultCache, ResultKey, RuleCache};

pub use notification::{
    NotificationDispatcher,     // Bus -> notifier forwarding loop
    RuleEvent,                  // Everything the engine publishes
    ViolationBus,               // Broadcast channel for events
    ViolationEvent,             // One failed validation evaluation
    ViolationNotifier,          // External alert channel
};

pub use engine::{evaluate_rule, EvaluationResult, RuleEngine};

pub use conflict::{
    conflict_key, merge_rules, ConditionOverlap, ConflictDetector, ConflictResolution,
    ConflictSeverity, ConflictType, OverlapKind, ResolutionStrategy, RuleConflict,
};

pub use validator::{RuleValidator, ValidationReport};

pub use template::{ParameterType, RuleTemplate, TemplateExample, TemplateParameter};

pub use diff::{
    collect_populated, diff_rules, render_unified, ChangeCounts, ChangeType, RuleChange,
};

pub use versioning::{RuleVersion, VersionComparison, VersioningService};

pub use lifecycle::RuleLifecycle;

pub use simulator::{
    AffectedUser, ImpactLevel, InMemorySampleData, RuleComparison, RuleSimulation,
    SampleDataSource, SampleUser, SimulationMetrics, SimulationStatus, SimulationViolation,
    Simulator, ViolationSeverity,
};
