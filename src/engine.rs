// Rule engine: loads the active rule set and evaluates it against a
// planning context.
//
// # Evaluation model
// - Rules are loaded from the store at most once per cache TTL
// - Only active, enabled, in-effect rules applicable to the context scope
//   are evaluated, highest priority first
// - Rules run in fixed-size batches; rules inside a batch run concurrently
//   on tokio tasks, batches run one after another
// - A rule that errors or panics is reported failed, the batch continues
//
// # Rule kinds
// A rule carrying a PREVENT action is a prohibition: its conditions describe
// the forbidden situation, so it fails when they all hold. Every other rule
// is a requirement and fails when any of its conditions does not hold.

use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::action_clause::{notification_severity, Action, ActionResult, ActionType};
use crate::config::EngineConfig;
use crate::conflict::{ConflictDetector, RuleConflict};
use crate::error::ConditionError;
use crate::match_clause::{CustomFunctionRegistry, EvaluationContext, EvaluationPurpose};
use crate::notification::{RuleEvent, ViolationBus, ViolationEvent};
use crate::rule_metadata::{Rule, RuleId, RuleMetrics};
use crate::rule_table::{ResultCache, ResultKey, RuleCache};
use crate::store::{RuleFilter, RuleStore};

// ============================================================================
// Evaluation result
// ============================================================================

/// Outcome of evaluating one rule against one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub passed: bool,
    /// Actions to apply; empty when the rule failed
    pub actions: Vec<Action>,
    /// Human-readable reasons; empty when the rule passed
    pub violations: Vec<String>,
    pub execution_time_us: u64,
    pub context: EvaluationContext,
}

impl EvaluationResult {
    pub fn passed(rule: &Rule, actions: Vec<Action>, execution_time_us: u64, context: EvaluationContext) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            passed: true,
            actions,
            violations: Vec::new(),
            execution_time_us,
            context,
        }
    }

    pub fn failed(
        rule: &Rule,
        violations: Vec<String>,
        execution_time_us: u64,
        context: EvaluationContext,
    ) -> Self {
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            passed: false,
            actions: Vec::new(),
            violations,
            execution_time_us,
            context,
        }
    }
}

/// Evaluate one rule against a context, with no caching, metrics or events.
pub fn evaluate_rule(
    rule: &Rule,
    context: &EvaluationContext,
    functions: &CustomFunctionRegistry,
) -> EvaluationResult {
    let started = Instant::now();
    let outcome = unmet_conditions(rule, context, functions);
    let elapsed_us = started.elapsed().as_micros() as u64;

    let unmet = match outcome {
        Ok(unmet) => unmet,
        Err(e) => {
            error!("Rule '{}' ({}) failed to evaluate: {}", rule.name, rule.id, e);
            return EvaluationResult::failed(
                rule,
                vec![format!("Evaluation error: {}", e)],
                elapsed_us,
                context.clone(),
            );
        }
    };

    if rule.is_prohibition() {
        if rule.has_conditions() && unmet.is_empty() {
            let violations = rule
                .actions
                .iter()
                .filter(|a| a.action_type == ActionType::Prevent)
                .map(|a| {
                    a.message
                        .clone()
                        .unwrap_or_else(|| format!("Prevented by rule '{}'", rule.name))
                })
                .collect();
            EvaluationResult::failed(rule, violations, elapsed_us, context.clone())
        } else {
            let actions = rule
                .actions
                .iter()
                .filter(|a| a.action_type != ActionType::Prevent)
                .cloned()
                .collect();
            EvaluationResult::passed(rule, actions, elapsed_us, context.clone())
        }
    } else if unmet.is_empty() {
        EvaluationResult::passed(rule, rule.actions.clone(), elapsed_us, context.clone())
    } else {
        let violations = unmet
            .into_iter()
            .map(|d| format!("Condition not met: {}", d))
            .collect();
        EvaluationResult::failed(rule, violations, elapsed_us, context.clone())
    }
}

/// Descriptions of every top-level condition and group that does not hold.
fn unmet_conditions(
    rule: &Rule,
    context: &EvaluationContext,
    functions: &CustomFunctionRegistry,
) -> Result<Vec<String>, ConditionError> {
    let mut unmet = Vec::new();
    for condition in &rule.conditions {
        if !condition.evaluate(context, functions)? {
            unmet.push(condition.describe());
        }
    }
    for group in &rule.condition_groups {
        if !group.evaluate(context, functions)? {
            unmet.push(group.describe());
        }
    }
    Ok(unmet)
}

// ============================================================================
// Engine
// ============================================================================

enum Pending {
    Cached(EvaluationResult),
    Running {
        rule: Rule,
        key: ResultKey,
        handle: JoinHandle<EvaluationResult>,
    },
}

/// Evaluates active rules against planning contexts.
///
/// Construct one per process and share it by reference or `Arc`.
pub struct RuleEngine {
    store: Arc<dyn RuleStore>,
    config: EngineConfig,
    functions: CustomFunctionRegistry,
    rule_cache: RuleCache,
    result_cache: ResultCache,
    bus: ViolationBus,
    detector: ConflictDetector,
    metrics: RwLock<HashMap<RuleId, RuleMetrics>>,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn RuleStore>, config: EngineConfig) -> Self {
        Self {
            store,
            rule_cache: RuleCache::new(config.rule_cache_ttl),
            result_cache: ResultCache::new(config.result_cache_ttl, config.max_cached_results),
            bus: ViolationBus::new(config.event_capacity),
            functions: CustomFunctionRegistry::new(),
            detector: ConflictDetector::new(),
            metrics: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn with_functions(mut self, functions: CustomFunctionRegistry) -> Self {
        self.functions = functions;
        self
    }

    pub fn with_detector(mut self, detector: ConflictDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Publish to an existing bus instead of a private one.
    pub fn with_bus(mut self, bus: ViolationBus) -> Self {
        self.bus = bus;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn functions(&self) -> &CustomFunctionRegistry {
        &self.functions
    }

    pub fn bus(&self) -> &ViolationBus {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuleEvent> {
        self.bus.subscribe()
    }

    /// Evaluate every applicable active rule, or only `rule_ids` when given.
    ///
    /// Results are returned in evaluation order (descending priority).
    pub async fn evaluate_rules(
        &self,
        context: &EvaluationContext,
        rule_ids: Option<&[RuleId]>,
    ) -> Vec<EvaluationResult> {
        let started = Instant::now();
        let mut rules: Vec<Rule> = self
            .load_active_rules()
            .await
            .into_iter()
            .filter(|r| r.is_eligible(context.evaluated_at))
            .filter(|r| applies_to_scope(r, context))
            .filter(|r| rule_ids.map_or(true, |ids| ids.contains(&r.id)))
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        let fingerprint = context.fingerprint();
        let shared_context = Arc::new(context.clone());
        let mut results = Vec::with_capacity(rules.len());

        for batch in rules.chunks(self.config.batch_size.max(1)) {
            let pending: Vec<Pending> = batch
                .iter()
                .map(|rule| self.start_evaluation(rule, &fingerprint, &shared_context))
                .collect();

            for item in pending {
                match item {
                    Pending::Cached(result) => results.push(result),
                    Pending::Running { rule, key, handle } => {
                        let result = match handle.await {
                            Ok(result) => result,
                            Err(e) => {
                                error!("Evaluation task for rule '{}' ({}) aborted: {}", rule.name, rule.id, e);
                                EvaluationResult::failed(
                                    &rule,
                                    vec![format!("Evaluation error: {}", e)],
                                    0,
                                    context.clone(),
                                )
                            }
                        };
                        self.record(&rule, &result);
                        if self.config.enable_result_cache {
                            self.result_cache.insert(key, result.clone());
                        }
                        if !result.passed && context.purpose == EvaluationPurpose::Validation {
                            self.notify_violation(&rule, &result);
                        }
                        results.push(result);
                    }
                }
            }
        }

        let failed = results.iter().filter(|r| !r.passed).count();
        info!(
            "Evaluated {} rules in {}us ({} failed)",
            results.len(),
            started.elapsed().as_micros(),
            failed
        );
        results
    }

    /// Evaluate a single rule in isolation: no store, cache, metrics or events.
    pub fn evaluate_rule(&self, rule: &Rule, context: &EvaluationContext) -> EvaluationResult {
        evaluate_rule(rule, context, &self.functions)
    }

    /// Execute the actions carried by a passing result.
    pub fn execute_actions(&self, result: &EvaluationResult) -> Vec<ActionResult> {
        result
            .actions
            .iter()
            .map(|a| a.execute(&result.context, &self.functions))
            .collect()
    }

    /// Conflicts between `rule` and the active rule set. Non-empty findings
    /// are published as a `ConflictsDetected` event.
    pub async fn detect_conflicts(&self, rule: &Rule) -> Vec<RuleConflict> {
        let active = self.load_active_rules().await;
        let conflicts = self.detector.detect_conflicts(rule, &active);
        if !conflicts.is_empty() {
            info!("Rule '{}' has {} conflicts with active rules", rule.name, conflicts.len());
            self.bus.publish(RuleEvent::ConflictsDetected {
                rule_id: rule.id.clone(),
                conflicts: conflicts.clone(),
                detected_at: Utc::now(),
            });
        }
        conflicts
    }

    /// Drop both the rule set cache and the result cache.
    pub fn clear_cache(&self) {
        self.rule_cache.clear();
        self.result_cache.clear();
        debug!("Rule engine caches cleared");
    }

    pub fn rule_metrics(&self, rule_id: &RuleId) -> Option<RuleMetrics> {
        self.metrics.read().get(rule_id).cloned()
    }

    pub fn all_metrics(&self) -> HashMap<RuleId, RuleMetrics> {
        self.metrics.read().clone()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn load_active_rules(&self) -> Vec<Rule> {
        if let Some(rules) = self.rule_cache.get() {
            return rules;
        }
        match self.store.find_active_rules(&RuleFilter::active()).await {
            Ok(rules) => {
                debug!("Loaded {} active rules from store", rules.len());
                self.rule_cache.store(rules.clone());
                rules
            }
            Err(e) => {
                warn!("Failed to load active rules, using cached set if any: {}", e);
                self.rule_cache.get_stale().unwrap_or_default()
            }
        }
    }

    fn start_evaluation(&self, rule: &Rule, fingerprint: &str, context: &Arc<EvaluationContext>) -> Pending {
        let key = ResultKey::new(rule, fingerprint);
        if self.config.enable_result_cache {
            if let Some(result) = self.result_cache.get(&key) {
                debug!("Result cache hit for rule {}", rule.id);
                return Pending::Cached(result);
            }
        }

        let task_rule = rule.clone();
        let task_context = Arc::clone(context);
        let functions = self.functions.clone();
        let handle = tokio::spawn(async move { evaluate_rule(&task_rule, &task_context, &functions) });
        Pending::Running {
            rule: rule.clone(),
            key,
            handle,
        }
    }

    fn record(&self, rule: &Rule, result: &EvaluationResult) {
        debug!("Rule {} evaluated in {}us", rule.id, result.execution_time_us);
        self.metrics
            .write()
            .entry(rule.id.clone())
            .or_default()
            .record_evaluation(result.passed, result.execution_time_us);
    }

    fn notify_violation(&self, rule: &Rule, result: &EvaluationResult) {
        self.bus.publish(RuleEvent::Violation(ViolationEvent {
            result: result.clone(),
            severity: notification_severity(&rule.actions),
            occurred_at: Utc::now(),
        }));
    }
}

fn applies_to_scope(rule: &Rule, context: &EvaluationContext) -> bool {
    rule.contexts.is_empty()
        || context
            .scope
            .as_ref()
            .map_or(false, |scope| rule.contexts.contains(scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_clause::NotificationSeverity;
    use crate::match_clause::{Condition, ConditionGroup, ConditionOperator, LogicalOperator};
    use crate::rule_metadata::{RuleBuilder, RuleType};
    use crate::store::InMemoryRuleStore;
    use serde_json::json;

    fn max_guards_rule() -> Rule {
        RuleBuilder::new("max 2 guards/month", RuleType::Planning)
            .id("max-guards")
            .active()
            .priority(5)
            .condition(Condition::new("planning.guardCount", ConditionOperator::GreaterThan, 2))
            .action(Action::prevent("planning.guard", "Maximum of 2 guards per month exceeded"))
            .build()
    }

    fn engine_with(rules: Vec<Rule>) -> (Arc<InMemoryRuleStore>, RuleEngine) {
        let store = Arc::new(InMemoryRuleStore::with_rules(rules));
        let engine = RuleEngine::new(store.clone());
        (store, engine)
    }

    #[tokio::test]
    async fn test_guard_limit_scenario() {
        let (_, engine) = engine_with(vec![max_guards_rule()]);

        let over = EvaluationContext::new(json!({"planning": {"guardCount": 3}}));
        let results = engine.evaluate_rules(&over, None).await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].passed);
        assert_eq!(results[0].violations, vec!["Maximum of 2 guards per month exceeded"]);
        assert!(results[0].actions.is_empty());

        let at_limit = EvaluationContext::new(json!({"planning": {"guardCount": 2}}));
        let results = engine.evaluate_rules(&at_limit, None).await;
        assert!(results[0].passed);
        assert!(results[0].violations.is_empty());
    }

    #[tokio::test]
    async fn test_rule_without_conditions_passes() {
        let rule = RuleBuilder::new("log everything", RuleType::Constraint)
            .active()
            .action(Action::log("seen"))
            .build();
        let prohibition = RuleBuilder::new("prevent nothing", RuleType::Constraint)
            .active()
            .action(Action::prevent("x", "never"))
            .build();
        let (_, engine) = engine_with(vec![rule, prohibition]);
        let results = engine
            .evaluate_rules(&EvaluationContext::new(json!({})), None)
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.passed));
    }

    #[tokio::test]
    async fn test_requirement_reports_each_unmet_condition() {
        let rule = RuleBuilder::new("senior on shift", RuleType::Supervision)
            .active()
            .condition(Condition::new("shift.seniorCount", ConditionOperator::GreaterThanOrEquals, 1))
            .condition(Condition::new("shift.staffCount", ConditionOperator::GreaterThanOrEquals, 3))
            .condition(Condition::unary("shift.lead", ConditionOperator::IsNotNull))
            .action(Action::notify("planner", "Shift staffing incomplete"))
            .build();
        let (_, engine) = engine_with(vec![rule]);

        let ctx = EvaluationContext::new(json!({"shift": {"seniorCount": 0, "staffCount": 2, "lead": "u1"}}));
        let result = &engine.evaluate_rules(&ctx, None).await[0];
        assert!(!result.passed);
        assert_eq!(result.violations.len(), 2);

        let ok = EvaluationContext::new(json!({"shift": {"seniorCount": 1, "staffCount": 3, "lead": "u1"}}));
        let result = &engine.evaluate_rules(&ok, None).await[0];
        assert!(result.passed);
        assert_eq!(result.actions.len(), 1);
    }

    #[tokio::test]
    async fn test_condition_groups_join_the_conjunction() {
        let rule = RuleBuilder::new("weekend cover", RuleType::Planning)
            .active()
            .condition_group(ConditionGroup::new(
                LogicalOperator::Or,
                vec![
                    Condition::new("date.isWeekend", ConditionOperator::Equals, false),
                    Condition::new("planning.onCall", ConditionOperator::Equals, true),
                ],
            ))
            .build();
        let (_, engine) = engine_with(vec![rule]);
        let weekend_no_cover = EvaluationContext::new(json!({"date": {"isWeekend": true}, "planning": {"onCall": false}}));
        assert!(!engine.evaluate_rules(&weekend_no_cover, None).await[0].passed);
    }

    #[tokio::test]
    async fn test_second_evaluation_uses_cache_until_cleared() {
        let (store, engine) = engine_with(vec![max_guards_rule()]);
        let ctx = EvaluationContext::new(json!({"planning": {"guardCount": 3}}));

        engine.evaluate_rules(&ctx, None).await;
        engine.evaluate_rules(&ctx, None).await;
        assert_eq!(store.read_count(), 1);

        engine.clear_cache();
        engine.evaluate_rules(&ctx, None).await;
        assert_eq!(store.read_count(), 2);
    }

    #[tokio::test]
    async fn test_cached_result_is_reused() {
        let (_, engine) = engine_with(vec![max_guards_rule()]);
        let ctx = EvaluationContext::new(json!({"planning": {"guardCount": 3}}));
        engine.evaluate_rules(&ctx, None).await;
        engine.evaluate_rules(&ctx, None).await;

        let metrics = engine.rule_metrics(&RuleId::from("max-guards")).unwrap();
        assert_eq!(metrics.evaluation_count, 1);
        assert_eq!(metrics.violation_count, 1);
    }

    #[tokio::test]
    async fn test_erroring_rule_does_not_abort_batch() {
        let broken = RuleBuilder::new("broken regex", RuleType::Constraint)
            .id("broken")
            .active()
            .priority(9)
            .condition(Condition::new("user.code", ConditionOperator::Regex, "([a-z"))
            .build();
        let panicking = RuleBuilder::new("panicking custom", RuleType::Constraint)
            .id("panicking")
            .active()
            .priority(8)
            .condition(Condition::custom("user.code", "explode", None))
            .build();
        let (_, engine) = engine_with(vec![broken, panicking, max_guards_rule()]);
        let registry = engine.functions().clone();
        registry.register("explode", |_, _| panic!("bad custom function"));

        let ctx = EvaluationContext::new(json!({"user": {"code": "abc"}, "planning": {"guardCount": 1}}));
        let results = engine.evaluate_rules(&ctx, None).await;
        assert_eq!(results.len(), 3);
        assert!(!results[0].passed);
        assert!(results[0].violations[0].starts_with("Evaluation error"));
        assert!(!results[1].passed);
        assert!(results[2].passed);
    }

    #[tokio::test]
    async fn test_batches_keep_priority_order() {
        let rules: Vec<Rule> = (0..7)
            .map(|i| {
                RuleBuilder::new(format!("rule {}", i), RuleType::Constraint)
                    .id(format!("r{}", i))
                    .priority(i)
                    .active()
                    .build()
            })
            .collect();
        let store = Arc::new(InMemoryRuleStore::with_rules(rules));
        let engine = RuleEngine::with_config(store, EngineConfig::default().with_batch_size(2));
        let results = engine
            .evaluate_rules(&EvaluationContext::new(json!({})), None)
            .await;
        let ids: Vec<&str> = results.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["r6", "r5", "r4", "r3", "r2", "r1", "r0"]);
    }

    #[tokio::test]
    async fn test_rule_id_and_scope_filters() {
        let icu_only = RuleBuilder::new("icu", RuleType::Planning)
            .id("icu")
            .active()
            .context("icu")
            .build();
        let (_, engine) = engine_with(vec![icu_only, max_guards_rule()]);

        let unscoped = EvaluationContext::new(json!({}));
        assert_eq!(engine.evaluate_rules(&unscoped, None).await.len(), 1);

        let icu = EvaluationContext::new(json!({})).with_scope("icu");
        assert_eq!(engine.evaluate_rules(&icu, None).await.len(), 2);

        let only = [RuleId::from("icu")];
        let results = engine.evaluate_rules(&icu, Some(&only)).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].rule_id.as_str(), "icu");
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_empty() {
        let (store, engine) = engine_with(vec![max_guards_rule()]);
        store.set_unavailable(true);
        let results = engine
            .evaluate_rules(&EvaluationContext::new(json!({})), None)
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_validation_failures_are_published() {
        let mut rule = max_guards_rule();
        rule.actions.push(Action::notify("planner", "guard limit").with_metadata("severity", "error"));
        let (_, engine) = engine_with(vec![rule]);
        let mut events = engine.subscribe();

        let advisory = EvaluationContext::new(json!({"planning": {"guardCount": 4}}))
            .with_purpose(EvaluationPurpose::Advisory);
        engine.evaluate_rules(&advisory, None).await;
        assert!(events.try_recv().is_err());

        let validation = EvaluationContext::new(json!({"planning": {"guardCount": 4}}));
        engine.evaluate_rules(&validation, None).await;
        match events.try_recv() {
            Ok(RuleEvent::Violation(event)) => {
                assert_eq!(event.severity, NotificationSeverity::Error);
                assert_eq!(event.result.rule_id.as_str(), "max-guards");
            }
            other => panic!("expected violation event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_detect_conflicts_publishes_event() {
        let iade = RuleBuilder::new("IADE only", RuleType::Allocation)
            .id("a")
            .active()
            .condition(Condition::new("user.role", ConditionOperator::Equals, "IADE"))
            .build();
        let mar = RuleBuilder::new("MAR only", RuleType::Allocation)
            .id("b")
            .active()
            .condition(Condition::new("user.role", ConditionOperator::Equals, "MAR"))
            .build();
        let (_, engine) = engine_with(vec![iade.clone(), mar]);
        let mut events = engine.subscribe();

        let conflicts = engine.detect_conflicts(&iade).await;
        assert_eq!(conflicts.len(), 1);
        assert!(matches!(events.try_recv(), Ok(RuleEvent::ConflictsDetected { .. })));
    }

    #[tokio::test]
    async fn test_execute_actions_on_passing_result() {
        let rule = RuleBuilder::new("cap hours", RuleType::Constraint)
            .active()
            .action(Action::modify("planning.hours", 48))
            .build();
        let (_, engine) = engine_with(vec![rule]);
        let results = engine
            .evaluate_rules(&EvaluationContext::new(json!({})), None)
            .await;
        let outcomes = engine.execute_actions(&results[0]);
        assert_eq!(
            outcomes,
            vec![ActionResult::Modified { target: "planning.hours".into(), value: json!(48) }]
        );
    }
}
