// demos/rule_engine_usage.rs
//
// Walks a rule from draft to active, evaluates planning contexts against
// it, and shows the violation bus, custom functions and version history.

use dynamic_rules::{
    Action, Condition, ConditionGroup, ConditionOperator, CustomFunctionRegistry,
    EvaluationContext, InMemoryRuleStore, LogicalOperator, RuleBuilder, RuleEngine, RuleEvent,
    RuleLifecycle, RuleType,
};
use serde_json::json;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Rule Engine Usage ===\n");

    let store = Arc::new(InMemoryRuleStore::new());
    let functions = CustomFunctionRegistry::new();
    functions.register("is_senior", |data, _| {
        let years = data.pointer("/user/experienceYears").and_then(|v| v.as_u64());
        Ok(years.map_or(false, |y| y >= 5))
    });
    let engine = Arc::new(RuleEngine::new(store.clone()).with_functions(functions));
    let lifecycle = RuleLifecycle::new(store.clone()).with_engine(Arc::clone(&engine));

    // Example 1: Author and activate rules
    println!("--- Example 1: Lifecycle ---");
    let guard_cap = RuleBuilder::new("max 2 guards/month", RuleType::Constraint)
        .priority(5)
        .condition(Condition::new("planning.guardCount", ConditionOperator::GreaterThan, 2))
        .action(
            Action::prevent("planning.guard", "Maximum of 2 guards per month exceeded")
                .with_metadata("severity", "ERROR"),
        )
        .build();
    let supervision = RuleBuilder::new("Senior present on shift", RuleType::Supervision)
        .priority(8)
        .condition_group(ConditionGroup::new(
            LogicalOperator::Or,
            vec![
                Condition::new("user.role", ConditionOperator::Equals, "MAR"),
                Condition::custom("user.experienceYears", "is_senior", None),
            ],
        ))
        .action(Action::suggest("Pair with a senior colleague"))
        .build();

    for rule in [guard_cap, supervision] {
        let draft = lifecycle.create_draft(rule, "planner").await?;
        let active = lifecycle.activate(&draft.id, "admin").await?;
        println!("Activated '{}' at version {}", active.name, active.version);
    }

    // Example 2: Evaluate contexts
    println!("\n--- Example 2: Evaluation ---");
    let mut events = engine.subscribe();
    let context = EvaluationContext::new(json!({
        "user": {"role": "IADE", "experienceYears": 2},
        "planning": {"guardCount": 3}
    }));
    for result in engine.evaluate_rules(&context, None).await {
        println!(
            "{:<28} passed={} violations={:?}",
            result.rule_name, result.passed, result.violations
        );
    }
    while let Ok(event) = events.try_recv() {
        if let RuleEvent::Violation(violation) = event {
            println!("Violation event: {} ({:?})", violation.result.rule_name, violation.severity);
        }
    }

    // Example 3: Metrics and caching
    println!("\n--- Example 3: Metrics ---");
    engine.evaluate_rules(&context, None).await;
    println!("Store reads so far: {}", store.read_count());
    for (rule_id, metrics) in engine.all_metrics() {
        println!(
            "{}: {} evaluations, violation rate {:.0}%",
            rule_id,
            metrics.evaluation_count,
            metrics.violation_rate() * 100.0
        );
    }

    println!("\n=== Done ===");
    Ok(())
}
