// demos/conflict_resolution_usage.rs
//
// Detects conflicts between independently authored rules and resolves them
// with each strategy.

use dynamic_rules::{
    Action, Condition, ConditionOperator, ConflictDetector, InMemoryRuleStore,
    ResolutionStrategy, RuleBuilder, RuleType, RuleValidator,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Conflict Resolution Usage ===\n");

    let iade_only = RuleBuilder::new("Night shift IADE only", RuleType::Allocation)
        .id("night-iade")
        .active()
        .priority(12)
        .condition(Condition::new("user.role", ConditionOperator::Equals, "IADE"))
        .action(Action::modify("planning.maxNightShifts", 10))
        .build();
    let mar_only = RuleBuilder::new("Night shift MAR only", RuleType::Allocation)
        .id("night-mar")
        .active()
        .priority(15)
        .condition(Condition::new("user.role", ConditionOperator::Equals, "MAR"))
        .action(Action::modify("planning.maxNightShifts", 20))
        .build();

    let store = Arc::new(InMemoryRuleStore::with_rules([iade_only.clone(), mar_only.clone()]));
    let detector = ConflictDetector::new();

    // Example 1: Detection
    println!("--- Example 1: Detection ---");
    let conflicts = detector.detect_all_conflicts(&[iade_only.clone(), mar_only.clone()]);
    for conflict in &conflicts {
        println!("[{:?}] {} -> {}", conflict.severity, conflict.id, conflict.description);
    }

    // Example 2: Validation sees the same conflicts as warnings
    println!("\n--- Example 2: Validation warnings ---");
    let report = RuleValidator::new().validate_against_existing(&iade_only, &[mar_only.clone()]);
    println!("valid={} warnings:", report.is_valid);
    for warning in &report.warnings {
        println!("  - {}", warning);
    }

    // Example 3: Each strategy
    println!("\n--- Example 3: Resolution ---");
    let Some(conflict) = conflicts.first() else {
        println!("No conflicts to resolve");
        return Ok(());
    };
    for strategy in [
        ResolutionStrategy::Priority,
        ResolutionStrategy::Merge,
        ResolutionStrategy::Override,
    ] {
        let resolution = detector
            .resolve_conflict(&*store, conflict, strategy, None, Some("admin"))
            .await?;
        let names: Vec<&str> = resolution.resolved_rules.iter().map(|r| r.name.as_str()).collect();
        println!("{:<9} -> {:?}", strategy.to_string(), names);
    }

    match detector
        .resolve_conflict(&*store, conflict, ResolutionStrategy::Manual, None, Some("admin"))
        .await
    {
        Ok(_) => println!("manual    -> unexpected success"),
        Err(e) => println!("manual    -> {}", e),
    }

    println!("\nActivity log entries: {}", store.activity_log().len());
    println!("\n=== Done ===");
    Ok(())
}
