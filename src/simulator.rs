//! What-if simulation of a candidate rule.
//!
//! The simulator replays a rule over every day of a date range for every
//! active user of a sample population, evaluating it through the engine in
//! isolation (no caches, metrics or notifications). Days outside the rule's
//! validity window are skipped. Each failing evaluation
//! becomes a [`SimulationViolation`]; per-user impact and aggregate metrics
//! are derived from those.
//!
//! Evaluation context layout for one (user, day):
//!
//! ```json
//! {
//!   "user":     {"id": "user-1", "name": "...", "role": "MAR", "experienceYears": 4},
//!   "planning": { ... sample planning data for that day ... },
//!   "leave":    { ... sample leave data for that day ... },
//!   "date":     {"value": "2025-03-01", "isWeekend": true, "dayOfWeek": 6, "dayName": "Saturday"}
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use log::{error, info};
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::action_clause::ActionType;
use crate::config::SimulationConfig;
use crate::engine::RuleEngine;
use crate::error::StoreError;
use crate::match_clause::{EvaluationContext, EvaluationPurpose};
use crate::rule_metadata::{Rule, RuleId};

// ============================================================================
// Sample data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleUser {
    pub id: String,
    pub name: String,
    pub role: String,
    pub experience_years: u32,
    pub active: bool,
}

impl SampleUser {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            role: role.into(),
            experience_years: 0,
            active: true,
        }
    }
}

/// Planning and leave data the simulator replays rules against.
#[async_trait]
pub trait SampleDataSource: Send + Sync {
    async fn active_users(&self) -> Result<Vec<SampleUser>, StoreError>;

    async fn planning_data(&self, user_id: &str, date: NaiveDate) -> Result<Value, StoreError>;

    async fn leave_data(&self, user_id: &str, date: NaiveDate) -> Result<Value, StoreError>;
}

/// In-memory sample population. Days without recorded data yield `{}`.
#[derive(Debug, Default)]
pub struct InMemorySampleData {
    users: RwLock<Vec<SampleUser>>,
    planning: RwLock<HashMap<(String, NaiveDate), Value>>,
    leave: RwLock<HashMap<(String, NaiveDate), Value>>,
}

const SYNTHETIC_ROLES: [&str; 3] = ["MAR", "IADE", "IBODE"];
const SYNTHETIC_SHIFTS: [&str; 3] = ["day", "night", "off"];

impl InMemorySampleData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: SampleUser) {
        self.users.write().push(user);
    }

    pub fn set_planning(&self, user_id: &str, date: NaiveDate, data: Value) {
        self.planning.write().insert((user_id.to_string(), date), data);
    }

    pub fn set_leave(&self, user_id: &str, date: NaiveDate, data: Value) {
        self.leave.write().insert((user_id.to_string(), date), data);
    }

    /// Seeded random population with a planning and leave record for every
    /// user on every day of `[start, start + days)`. The same seed always
    /// produces the same data.
    pub fn synthetic(seed: u64, user_count: usize, start: NaiveDate, days: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = Self::new();

        for i in 0..user_count {
            let id = format!("user-{}", i + 1);
            let quota: u32 = rng.gen_range(0..=25);
            data.add_user(SampleUser {
                name: format!("Sample user {}", i + 1),
                role: SYNTHETIC_ROLES[rng.gen_range(0..SYNTHETIC_ROLES.len())].to_string(),
                experience_years: rng.gen_range(0..=20),
                active: true,
                id: id.clone(),
            });

            for date in start.iter_days().take(days as usize) {
                data.set_planning(
                    &id,
                    date,
                    json!({
                        "guardCount": rng.gen_range(0..=4),
                        "onCallCount": rng.gen_range(0..=3),
                        "hoursWorked": rng.gen_range(0..=12),
                        "daysSinceLastGuard": rng.gen_range(0..=14),
                        "shift": SYNTHETIC_SHIFTS[rng.gen_range(0..SYNTHETIC_SHIFTS.len())],
                    }),
                );
                data.set_leave(
                    &id,
                    date,
                    json!({
                        "onLeave": rng.gen_bool(0.1),
                        "remainingQuota": quota,
                    }),
                );
            }
        }
        data
    }
}

#[async_trait]
impl SampleDataSource for InMemorySampleData {
    async fn active_users(&self) -> Result<Vec<SampleUser>, StoreError> {
        Ok(self.users.read().iter().filter(|u| u.active).cloned().collect())
    }

    async fn planning_data(&self, user_id: &str, date: NaiveDate) -> Result<Value, StoreError> {
        Ok(self
            .planning
            .read()
            .get(&(user_id.to_string(), date))
            .cloned()
            .unwrap_or_else(|| json!({})))
    }

    async fn leave_data(&self, user_id: &str, date: NaiveDate) -> Result<Value, StoreError> {
        Ok(self
            .leave
            .read()
            .get(&(user_id.to_string(), date))
            .cloned()
            .unwrap_or_else(|| json!({})))
    }
}

// ============================================================================
// Simulation records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
}

impl ImpactLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactLevel::Low => "low",
            ImpactLevel::Medium => "medium",
            ImpactLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ViolationSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationSeverity::Low => "low",
            ViolationSeverity::Medium => "medium",
            ViolationSeverity::High => "high",
            ViolationSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SimulationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationStatus::Pending => "pending",
            SimulationStatus::Running => "running",
            SimulationStatus::Completed => "completed",
            SimulationStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AffectedUser {
    pub user_id: String,
    pub impact_level: ImpactLevel,
    pub affected_dates: Vec<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationViolation {
    pub date: NaiveDate,
    pub user_id: String,
    pub description: String,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationMetrics {
    pub total_violations: usize,
    pub affected_users_count: usize,
    /// In [0, 1]
    pub compliance_rate: f64,
    /// Percentage, capped
    pub estimated_workload_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSimulation {
    pub id: String,
    pub rule_id: RuleId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub affected_users: Vec<AffectedUser>,
    pub violations: Vec<SimulationViolation>,
    pub metrics: SimulationMetrics,
    pub status: SimulationStatus,
    /// Set when `status` is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RuleSimulation {
    fn pending(rule: &Rule, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            start_date: start,
            end_date: end,
            affected_users: Vec::new(),
            violations: Vec::new(),
            metrics: SimulationMetrics::default(),
            status: SimulationStatus::Pending,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Inclusive day count of the simulated window.
    pub fn days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }
}

/// Two simulations over the same window; deltas are `second - first`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleComparison {
    pub first: RuleSimulation,
    pub second: RuleSimulation,
    pub violations_delta: i64,
    pub affected_users_delta: i64,
    pub compliance_rate_delta: f64,
    pub workload_change_delta: f64,
}

// ============================================================================
// Simulator
// ============================================================================

struct Outcome {
    violations: Vec<SimulationViolation>,
    affected_users: Vec<AffectedUser>,
    metrics: SimulationMetrics,
}

pub struct Simulator {
    engine: Arc<RuleEngine>,
    data: Arc<dyn SampleDataSource>,
    config: SimulationConfig,
}

impl Simulator {
    pub fn new(engine: Arc<RuleEngine>, data: Arc<dyn SampleDataSource>) -> Self {
        Self::with_config(engine, data, SimulationConfig::default())
    }

    pub fn with_config(engine: Arc<RuleEngine>, data: Arc<dyn SampleDataSource>, config: SimulationConfig) -> Self {
        Self { engine, data, config }
    }

    /// Replay `rule` over `[start, end]`. Never fails: problems end up as a
    /// `failed` status with an error message and no partial results.
    pub async fn simulate_rule(&self, rule: &Rule, start: NaiveDate, end: NaiveDate) -> RuleSimulation {
        let mut simulation = RuleSimulation::pending(rule, start, end);
        simulation.status = SimulationStatus::Running;

        match self.run(rule, start, end).await {
            Ok(outcome) => {
                info!(
                    "Simulated rule {} over {} days: {} violations, compliance {:.3}",
                    rule.id,
                    simulation.days(),
                    outcome.metrics.total_violations,
                    outcome.metrics.compliance_rate
                );
                simulation.violations = outcome.violations;
                simulation.affected_users = outcome.affected_users;
                simulation.metrics = outcome.metrics;
                simulation.status = SimulationStatus::Completed;
            }
            Err(e) => {
                error!("Simulation of rule {} failed: {}", rule.id, e);
                simulation.status = SimulationStatus::Failed;
                simulation.error = Some(e);
            }
        }
        simulation.completed_at = Some(Utc::now());
        simulation
    }

    /// Simulate both rules over the same window.
    pub async fn compare_rules(&self, first: &Rule, second: &Rule, start: NaiveDate, end: NaiveDate) -> RuleComparison {
        let (a, b) = tokio::join!(
            self.simulate_rule(first, start, end),
            self.simulate_rule(second, start, end)
        );
        RuleComparison {
            violations_delta: b.metrics.total_violations as i64 - a.metrics.total_violations as i64,
            affected_users_delta: b.metrics.affected_users_count as i64 - a.metrics.affected_users_count as i64,
            compliance_rate_delta: b.metrics.compliance_rate - a.metrics.compliance_rate,
            workload_change_delta: b.metrics.estimated_workload_change - a.metrics.estimated_workload_change,
            first: a,
            second: b,
        }
    }

    /// Plain-text report: period, headline metrics, violations by severity
    /// and the most impacted users.
    pub fn generate_impact_report(&self, simulation: &RuleSimulation) -> String {
        let mut lines = vec![
            format!("Rule impact report: {}", simulation.rule_id),
            format!(
                "Period: {} to {} ({} days)",
                simulation.start_date,
                simulation.end_date,
                simulation.days()
            ),
            format!("Status: {}", simulation.status.as_str()),
        ];
        if let Some(e) = &simulation.error {
            lines.push(format!("Error: {}", e));
            return lines.join("\n");
        }

        let metrics = &simulation.metrics;
        lines.push(String::new());
        lines.push(format!("Total violations: {}", metrics.total_violations));
        lines.push(format!("Affected users: {}", metrics.affected_users_count));
        lines.push(format!("Compliance rate: {:.1}%", metrics.compliance_rate * 100.0));
        lines.push(format!(
            "Estimated workload change: +{:.1}%",
            metrics.estimated_workload_change
        ));

        let mut by_severity: BTreeMap<ViolationSeverity, usize> = BTreeMap::new();
        for violation in &simulation.violations {
            *by_severity.entry(violation.severity).or_default() += 1;
        }
        lines.push(String::new());
        lines.push("Violations by severity:".to_string());
        for severity in [
            ViolationSeverity::Critical,
            ViolationSeverity::High,
            ViolationSeverity::Medium,
            ViolationSeverity::Low,
        ] {
            lines.push(format!(
                "  {}: {}",
                severity.as_str(),
                by_severity.get(&severity).copied().unwrap_or(0)
            ));
        }

        let mut users: Vec<&AffectedUser> = simulation.affected_users.iter().collect();
        users.sort_by(|a, b| {
            b.affected_dates
                .len()
                .cmp(&a.affected_dates.len())
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        lines.push(String::new());
        lines.push("Most impacted users:".to_string());
        if users.is_empty() {
            lines.push("  none".to_string());
        }
        for (rank, user) in users.iter().take(self.config.report_top_users).enumerate() {
            lines.push(format!(
                "  {}. {}: {} days ({})",
                rank + 1,
                user.user_id,
                user.affected_dates.len(),
                user.impact_level.as_str()
            ));
        }
        lines.join("\n")
    }

    /// Severity of every violation of `rule`.
    pub fn violation_severity(&self, rule: &Rule) -> ViolationSeverity {
        if rule.priority >= self.config.critical_violation_priority {
            ViolationSeverity::Critical
        } else if rule.priority >= self.config.high_violation_priority || rule.has_action(ActionType::Prevent) {
            ViolationSeverity::High
        } else if rule.has_action(ActionType::Notify) {
            ViolationSeverity::Medium
        } else {
            ViolationSeverity::Low
        }
    }

    pub fn impact_level(&self, affected_days: usize) -> ImpactLevel {
        if affected_days >= self.config.high_impact_days {
            ImpactLevel::High
        } else if affected_days >= self.config.medium_impact_days {
            ImpactLevel::Medium
        } else {
            ImpactLevel::Low
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn run(&self, rule: &Rule, start: NaiveDate, end: NaiveDate) -> Result<Outcome, String> {
        if end < start {
            return Err(format!("end date {} is before start date {}", end, start));
        }
        let users = self.data.active_users().await.map_err(|e| e.to_string())?;
        let severity = self.violation_severity(rule);

        let mut violations = Vec::new();
        let mut affected: BTreeMap<String, Vec<NaiveDate>> = BTreeMap::new();
        let mut evaluations = 0usize;

        for date in start.iter_days().take_while(|d| *d <= end) {
            if !in_effect_on(rule, date) {
                continue;
            }
            for user in &users {
                let context = self.build_context(user, date).await.map_err(|e| e.to_string())?;
                let result = self.engine.evaluate_rule(rule, &context);
                evaluations += 1;
                if result.passed {
                    continue;
                }
                violations.push(SimulationViolation {
                    date,
                    user_id: user.id.clone(),
                    description: result.violations.join("; "),
                    severity,
                });
                let dates = affected.entry(user.id.clone()).or_default();
                if dates.last() != Some(&date) {
                    dates.push(date);
                }
            }
        }

        let affected_users: Vec<AffectedUser> = affected
            .into_iter()
            .map(|(user_id, dates)| AffectedUser {
                impact_level: self.impact_level(dates.len()),
                user_id,
                affected_dates: dates,
            })
            .collect();

        let metrics = self.metrics(violations.len(), affected_users.len(), evaluations);
        Ok(Outcome {
            violations,
            affected_users,
            metrics,
        })
    }

    fn metrics(&self, total_violations: usize, affected_users_count: usize, evaluations: usize) -> SimulationMetrics {
        let compliance_rate = if evaluations == 0 {
            1.0
        } else {
            1.0 - total_violations as f64 / evaluations as f64
        };
        let estimated_workload_change = if affected_users_count == 0 {
            0.0
        } else {
            let per_user = total_violations as f64 / affected_users_count as f64;
            (self.config.workload_per_violation * per_user).min(self.config.workload_change_cap)
        };
        SimulationMetrics {
            total_violations,
            affected_users_count,
            compliance_rate,
            estimated_workload_change,
        }
    }

    async fn build_context(&self, user: &SampleUser, date: NaiveDate) -> Result<EvaluationContext, StoreError> {
        let planning = self.data.planning_data(&user.id, date).await?;
        let leave = self.data.leave_data(&user.id, date).await?;
        let weekday = date.weekday();

        let data = json!({
            "user": {
                "id": user.id,
                "name": user.name,
                "role": user.role,
                "experienceYears": user.experience_years,
            },
            "planning": planning,
            "leave": leave,
            "date": {
                "value": date.to_string(),
                "isWeekend": matches!(weekday, Weekday::Sat | Weekday::Sun),
                "dayOfWeek": weekday.number_from_monday(),
                "dayName": day_name(weekday),
            },
        });

        let at = date.and_hms_opt(0, 0, 0).map(|t| t.and_utc()).unwrap_or_else(Utc::now);
        Ok(EvaluationContext::new(data)
            .with_purpose(EvaluationPurpose::Simulation)
            .at(at))
    }
}

/// True when the rule's validity window overlaps any part of `date`.
fn in_effect_on(rule: &Rule, date: NaiveDate) -> bool {
    let day_start = date.and_time(NaiveTime::MIN).and_utc();
    let day_end = day_start + Duration::days(1);
    rule.effective_date < day_end && rule.expiration_date.map_or(true, |end| end > day_start)
}

fn day_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_clause::Action;
    use crate::match_clause::{Condition, ConditionOperator};
    use crate::rule_metadata::{RuleBuilder, RuleType};
    use crate::store::InMemoryRuleStore;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn since(s: &str) -> DateTime<Utc> {
        date(s).and_time(NaiveTime::MIN).and_utc()
    }

    fn guard_cap() -> Rule {
        RuleBuilder::new("max 2 guards/month", RuleType::Planning)
            .id("guard-cap")
            .priority(5)
            .effective_date(since("2025-01-01"))
            .condition(Condition::new("planning.guardCount", ConditionOperator::GreaterThan, 2))
            .action(Action::prevent("planning.guard", "Too many guards"))
            .build()
    }

    fn simulator(data: InMemorySampleData) -> Simulator {
        let engine = Arc::new(RuleEngine::new(Arc::new(InMemoryRuleStore::new())));
        Simulator::new(engine, Arc::new(data))
    }

    struct BrokenData;

    #[async_trait]
    impl SampleDataSource for BrokenData {
        async fn active_users(&self) -> Result<Vec<SampleUser>, StoreError> {
            Ok(vec![SampleUser::new("user-1", "MAR")])
        }

        async fn planning_data(&self, _: &str, _: NaiveDate) -> Result<Value, StoreError> {
            Err(StoreError::Backend("planning database offline".into()))
        }

        async fn leave_data(&self, _: &str, _: NaiveDate) -> Result<Value, StoreError> {
            Ok(json!({}))
        }
    }

    #[tokio::test]
    async fn test_empty_population_is_fully_compliant() {
        let sim = simulator(InMemorySampleData::new())
            .simulate_rule(&guard_cap(), date("2025-03-01"), date("2025-03-07"))
            .await;
        assert_eq!(sim.status, SimulationStatus::Completed);
        assert_eq!(sim.metrics.total_violations, 0);
        assert_eq!(sim.metrics.compliance_rate, 1.0);
        assert_eq!(sim.metrics.estimated_workload_change, 0.0);
        assert_eq!(sim.days(), 7);
    }

    #[tokio::test]
    async fn test_violations_impact_and_metrics() {
        let data = InMemorySampleData::new();
        data.add_user(SampleUser::new("user-1", "MAR"));
        data.add_user(SampleUser::new("user-2", "IADE"));
        let start = date("2025-03-01");
        for d in start.iter_days().take(3) {
            data.set_planning("user-1", d, json!({"guardCount": 3}));
            data.set_planning("user-2", d, json!({"guardCount": 1}));
        }

        let sim = simulator(data)
            .simulate_rule(&guard_cap(), start, date("2025-03-03"))
            .await;
        assert_eq!(sim.status, SimulationStatus::Completed);
        assert_eq!(sim.metrics.total_violations, 3);
        assert_eq!(sim.metrics.affected_users_count, 1);
        assert!((sim.metrics.compliance_rate - 0.5).abs() < 1e-9);
        assert!((sim.metrics.estimated_workload_change - 22.5).abs() < 1e-9);

        assert!(sim.violations.iter().all(|v| v.severity == ViolationSeverity::High));
        assert_eq!(sim.violations[0].description, "Too many guards");
        assert_eq!(sim.affected_users[0].user_id, "user-1");
        assert_eq!(sim.affected_users[0].affected_dates.len(), 3);
        assert_eq!(sim.affected_users[0].impact_level, ImpactLevel::Low);
    }

    #[tokio::test]
    async fn test_days_outside_validity_window_are_skipped() {
        let data = InMemorySampleData::new();
        data.add_user(SampleUser::new("user-1", "MAR"));
        let start = date("2025-03-01");
        for d in start.iter_days().take(10) {
            data.set_planning("user-1", d, json!({"guardCount": 5}));
        }
        let windowed = Rule {
            effective_date: since("2025-03-03") + Duration::hours(8),
            expiration_date: Some(since("2025-03-06")),
            ..guard_cap()
        };

        let sim = simulator(data)
            .simulate_rule(&windowed, start, date("2025-03-10"))
            .await;
        let dates: Vec<NaiveDate> = sim.violations.iter().map(|v| v.date).collect();
        assert_eq!(dates, vec![date("2025-03-03"), date("2025-03-04"), date("2025-03-05")]);
        assert_eq!(sim.metrics.compliance_rate, 0.0);
        assert_eq!(sim.days(), 10);
    }

    #[tokio::test]
    async fn test_weekend_flag_in_context() {
        let data = InMemorySampleData::new();
        data.add_user(SampleUser::new("user-1", "MAR"));
        let weekend_rule = RuleBuilder::new("no weekend work", RuleType::Planning)
            .id("weekend")
            .effective_date(since("2025-01-01"))
            .condition(Condition::new("date.isWeekend", ConditionOperator::Equals, true))
            .action(Action::prevent("planning.shift", "Weekend"))
            .build();

        // 2025-03-03 is a Monday
        let sim = simulator(data)
            .simulate_rule(&weekend_rule, date("2025-03-03"), date("2025-03-09"))
            .await;
        let dates: Vec<NaiveDate> = sim.violations.iter().map(|v| v.date).collect();
        assert_eq!(dates, vec![date("2025-03-08"), date("2025-03-09")]);
    }

    #[tokio::test]
    async fn test_failures_mark_the_simulation_failed() {
        let engine = Arc::new(RuleEngine::new(Arc::new(InMemoryRuleStore::new())));
        let broken = Simulator::new(engine, Arc::new(BrokenData));
        let sim = broken
            .simulate_rule(&guard_cap(), date("2025-03-01"), date("2025-03-02"))
            .await;
        assert_eq!(sim.status, SimulationStatus::Failed);
        assert!(sim.error.as_deref().unwrap_or_default().contains("offline"));
        assert!(sim.violations.is_empty());

        let reversed = simulator(InMemorySampleData::new())
            .simulate_rule(&guard_cap(), date("2025-03-05"), date("2025-03-01"))
            .await;
        assert_eq!(reversed.status, SimulationStatus::Failed);
    }

    #[tokio::test]
    async fn test_compare_rules_reports_deltas() {
        let start = date("2025-03-01");
        let sim = simulator(InMemorySampleData::synthetic(7, 10, start, 14));
        let strict = RuleBuilder::new("max 1 guard", RuleType::Planning)
            .id("strict")
            .effective_date(since("2025-01-01"))
            .condition(Condition::new("planning.guardCount", ConditionOperator::GreaterThan, 1))
            .action(Action::prevent("planning.guard", "Too many guards"))
            .build();

        let comparison = sim.compare_rules(&guard_cap(), &strict, start, date("2025-03-14")).await;
        assert!(comparison.violations_delta >= 0);
        assert!(comparison.compliance_rate_delta <= 0.0);
        assert_eq!(
            comparison.violations_delta,
            comparison.second.metrics.total_violations as i64 - comparison.first.metrics.total_violations as i64
        );
    }

    #[tokio::test]
    async fn test_synthetic_data_is_deterministic() {
        let start = date("2025-03-01");
        let a = InMemorySampleData::synthetic(42, 3, start, 5);
        let b = InMemorySampleData::synthetic(42, 3, start, 5);
        assert_eq!(a.active_users().await.unwrap(), b.active_users().await.unwrap());
        assert_eq!(
            a.planning_data("user-2", date("2025-03-04")).await.unwrap(),
            b.planning_data("user-2", date("2025-03-04")).await.unwrap()
        );
        assert_eq!(a.planning_data("user-2", date("2025-04-01")).await.unwrap(), json!({}));
    }

    #[test]
    fn test_severity_and_impact_thresholds() {
        let sim = simulator(InMemorySampleData::new());
        let notify = RuleBuilder::new("notify", RuleType::Planning)
            .action(Action::notify("planner", "x"))
            .build();
        let critical = RuleBuilder::new("critical", RuleType::Planning).priority(20).build();
        let log_only = RuleBuilder::new("log", RuleType::Planning).action(Action::log("x")).build();

        assert_eq!(sim.violation_severity(&critical), ViolationSeverity::Critical);
        assert_eq!(sim.violation_severity(&guard_cap()), ViolationSeverity::High);
        assert_eq!(sim.violation_severity(&notify), ViolationSeverity::Medium);
        assert_eq!(sim.violation_severity(&log_only), ViolationSeverity::Low);

        assert_eq!(sim.impact_level(10), ImpactLevel::High);
        assert_eq!(sim.impact_level(5), ImpactLevel::Medium);
        assert_eq!(sim.impact_level(4), ImpactLevel::Low);
    }

    #[tokio::test]
    async fn test_impact_report_sections() {
        let data = InMemorySampleData::new();
        data.add_user(SampleUser::new("user-1", "MAR"));
        data.set_planning("user-1", date("2025-03-01"), json!({"guardCount": 4}));
        let sim = simulator(data);
        let result = sim
            .simulate_rule(&guard_cap(), date("2025-03-01"), date("2025-03-02"))
            .await;

        let report = sim.generate_impact_report(&result);
        assert!(report.contains("Period: 2025-03-01 to 2025-03-02 (2 days)"));
        assert!(report.contains("Status: completed"));
        assert!(report.contains("Compliance rate: 50.0%"));
        assert!(report.contains("  high: 1"));
        assert!(report.contains("  1. user-1: 1 days (low)"));
    }
}
