// demos/simulation_usage.rs
//
// Estimates the impact of two candidate guard rules on a synthetic
// population before activating either.

use chrono::{NaiveDate, NaiveTime};
use dynamic_rules::{
    Action, Condition, ConditionOperator, InMemoryRuleStore, InMemorySampleData, RuleBuilder,
    RuleEngine, RuleType, Simulator,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Simulation Usage ===\n");

    let start = NaiveDate::from_ymd_opt(2025, 3, 1).ok_or("invalid start date")?;
    let end = NaiveDate::from_ymd_opt(2025, 3, 31).ok_or("invalid end date")?;

    let engine = Arc::new(RuleEngine::new(Arc::new(InMemoryRuleStore::new())));
    let data = Arc::new(InMemorySampleData::synthetic(2025, 25, start, 31));
    let simulator = Simulator::new(engine, data);
    // Candidates are replayed as if they had been active since the start of the period.
    let since = start.and_time(NaiveTime::MIN).and_utc();

    let lenient = RuleBuilder::new("max 3 guards/month", RuleType::Constraint)
        .priority(5)
        .effective_date(since)
        .condition(Condition::new("planning.guardCount", ConditionOperator::GreaterThan, 3))
        .action(Action::prevent("planning.guard", "More than 3 guards this month"))
        .build();
    let strict = RuleBuilder::new("max 2 guards/month", RuleType::Constraint)
        .priority(5)
        .effective_date(since)
        .condition(Condition::new("planning.guardCount", ConditionOperator::GreaterThan, 2))
        .action(Action::prevent("planning.guard", "More than 2 guards this month"))
        .build();

    // Example 1: Single rule report
    println!("--- Example 1: Impact report ---");
    let simulation = simulator.simulate_rule(&strict, start, end).await;
    println!("{}", simulator.generate_impact_report(&simulation));

    // Example 2: Compare candidates
    println!("\n--- Example 2: Comparison ---");
    let comparison = simulator.compare_rules(&lenient, &strict, start, end).await;
    println!("Violations delta:      {:+}", comparison.violations_delta);
    println!("Affected users delta:  {:+}", comparison.affected_users_delta);
    println!("Compliance delta:      {:+.3}", comparison.compliance_rate_delta);
    println!("Workload change delta: {:+.1}%", comparison.workload_change_delta);

    println!("\n=== Done ===");
    Ok(())
}
