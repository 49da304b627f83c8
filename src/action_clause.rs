// This module implements the action half of a rule: what a rule asks for
// once its conditions have been decided.
//
// Actions form a closed vocabulary (PREVENT, ALLOW, NOTIFY, MODIFY, LOG,
// SUGGEST, ESCALATE, CUSTOM). Executing an action never mutates the planning
// context; it produces an ActionResult describing the requested effect and
// leaves enforcement to the caller.

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::match_clause::{values_equal, CustomFunctionRegistry, EvaluationContext};

// ============================================================================
// ACTION TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Block the proposed change
    Prevent,
    /// Explicitly permit the proposed change
    Allow,
    /// Alert a planner or role
    Notify,
    /// Adjust a value in the proposed plan
    Modify,
    Log,
    Suggest,
    Escalate,
    Custom,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Prevent => "PREVENT",
            ActionType::Allow => "ALLOW",
            ActionType::Notify => "NOTIFY",
            ActionType::Modify => "MODIFY",
            ActionType::Log => "LOG",
            ActionType::Suggest => "SUGGEST",
            ActionType::Escalate => "ESCALATE",
            ActionType::Custom => "CUSTOM",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to violation alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationSeverity {
    Info,
    #[default]
    Warning,
    Error,
}

impl NotificationSeverity {
    /// Case-insensitive parse of `info` / `warning` / `error`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Some(NotificationSeverity::Info),
            "warning" | "warn" => Some(NotificationSeverity::Warning),
            "error" => Some(NotificationSeverity::Error),
            _ => None,
        }
    }
}

/// Allowed values for `metadata.priority` on NOTIFY actions.
pub const NOTIFY_PRIORITIES: [&str; 4] = ["low", "medium", "high", "urgent"];

// ============================================================================
// ACTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_function: Option<String>,
}

impl Action {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            target: None,
            value: None,
            message: None,
            metadata: BTreeMap::new(),
            custom_function: None,
        }
    }

    pub fn prevent(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ActionType::Prevent).with_target(target).with_message(message)
    }

    pub fn allow(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ActionType::Allow).with_target(target).with_message(message)
    }

    pub fn notify(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ActionType::Notify).with_target(target).with_message(message)
    }

    pub fn modify(target: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(ActionType::Modify).with_target(target).with_value(value)
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::new(ActionType::Log).with_message(message)
    }

    pub fn suggest(message: impl Into<String>) -> Self {
        Self::new(ActionType::Suggest).with_message(message)
    }

    pub fn escalate(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ActionType::Escalate).with_target(target).with_message(message)
    }

    pub fn custom(function: impl Into<String>) -> Self {
        let mut action = Self::new(ActionType::Custom);
        action.custom_function = Some(function.into());
        action
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// True when both actions on the same target ask for opposite effects:
    /// ALLOW against PREVENT, or two MODIFYs with different values.
    pub fn contradicts(&self, other: &Action) -> bool {
        use ActionType::*;
        match (self.action_type, other.action_type) {
            (Allow, Prevent) | (Prevent, Allow) => true,
            (Modify, Modify) => match (&self.value, &other.value) {
                (Some(a), Some(b)) => !values_equal(a, b),
                (a, b) => a != b,
            },
            _ => false,
        }
    }

    /// Severity declared in `metadata.severity`, or in
    /// `metadata.validate.severity`.
    pub fn declared_severity(&self) -> Option<NotificationSeverity> {
        self.metadata
            .get("severity")
            .or_else(|| self.metadata.get("validate").and_then(|v| v.get("severity")))
            .and_then(Value::as_str)
            .and_then(NotificationSeverity::parse)
    }

    /// Execute this action for a context the rule applied to.
    pub fn execute(&self, context: &EvaluationContext, functions: &CustomFunctionRegistry) -> ActionResult {
        let target = self.target.clone().unwrap_or_default();
        let message = self.message.clone().unwrap_or_default();
        match self.action_type {
            ActionType::Prevent => ActionResult::Blocked { target, message },
            ActionType::Allow => ActionResult::Allowed { target },
            ActionType::Notify => ActionResult::Notified {
                target,
                message,
                severity: self.declared_severity().unwrap_or_default(),
            },
            ActionType::Modify => ActionResult::Modified {
                target,
                value: self.value.clone().unwrap_or(Value::Null),
            },
            ActionType::Log => {
                info!("Rule action log: {}", message);
                ActionResult::Logged { message }
            }
            ActionType::Suggest => ActionResult::Suggested { message },
            ActionType::Escalate => ActionResult::Escalated { target, message },
            ActionType::Custom => {
                let function = self.custom_function.clone().unwrap_or_default();
                let succeeded = functions.invoke(&function, &context.data, self.value.as_ref());
                ActionResult::Custom { function, succeeded }
            }
        }
    }
}

/// Notification severity for a set of actions: the first NOTIFY action's
/// declared severity, else any action's `validate` severity, else WARNING.
pub fn notification_severity(actions: &[Action]) -> NotificationSeverity {
    actions
        .iter()
        .filter(|a| a.action_type == ActionType::Notify)
        .find_map(Action::declared_severity)
        .or_else(|| {
            actions.iter().find_map(|a| {
                a.metadata
                    .get("validate")
                    .and_then(|v| v.get("severity"))
                    .and_then(Value::as_str)
                    .and_then(NotificationSeverity::parse)
            })
        })
        .unwrap_or_default()
}

// ============================================================================
// ACTION EXECUTION RESULT
// ============================================================================

/// Effect requested by an executed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionResult {
    Blocked { target: String, message: String },
    Allowed { target: String },
    Notified { target: String, message: String, severity: NotificationSeverity },
    Modified { target: String, value: Value },
    Logged { message: String },
    Suggested { message: String },
    Escalated { target: String, message: String },
    Custom { function: String, succeeded: bool },
}

impl ActionResult {
    /// Returns true if the proposed change must not go through.
    pub fn should_block(&self) -> bool {
        matches!(self, ActionResult::Blocked { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_contradictions() {
        let allow = Action::allow("planning.guard", "ok");
        let prevent = Action::prevent("planning.guard", "no");
        assert!(allow.contradicts(&prevent));
        assert!(prevent.contradicts(&allow));
        assert!(Action::modify("t", 10).contradicts(&Action::modify("t", 20)));
        assert!(!Action::modify("t", 10).contradicts(&Action::modify("t", 10)));
        assert!(!Action::notify("t", "a").contradicts(&prevent));
    }

    #[test]
    fn test_modify_values_compare_numerically() {
        assert!(!Action::modify("planning.hours", 10).contradicts(&Action::modify("planning.hours", 10.0)));
        assert!(Action::modify("planning.hours", 10).contradicts(&Action::modify("planning.hours", 10.5)));
        assert!(Action::new(ActionType::Modify)
            .with_target("planning.hours")
            .contradicts(&Action::modify("planning.hours", 10)));
    }

    #[test]
    fn test_notification_severity_resolution() {
        let notify = Action::notify("planner", "check").with_metadata("severity", "error");
        assert_eq!(notification_severity(&[notify]), NotificationSeverity::Error);

        let validated = Action::prevent("x", "y").with_metadata("validate", json!({"severity": "INFO"}));
        assert_eq!(notification_severity(&[validated]), NotificationSeverity::Info);

        assert_eq!(notification_severity(&[Action::log("x")]), NotificationSeverity::Warning);
    }

    #[test]
    fn test_execute_produces_requested_effect() {
        let context = EvaluationContext::new(json!({"user": {"id": "u1"}}));
        let registry = CustomFunctionRegistry::new();
        registry.register("flag", |data, _| Ok(data["user"]["id"] == "u1"));

        let blocked = Action::prevent("planning.guard", "Too many guards").execute(&context, &registry);
        assert!(blocked.should_block());

        let modified = Action::modify("planning.hours", 8).execute(&context, &registry);
        assert_eq!(
            modified,
            ActionResult::Modified { target: "planning.hours".into(), value: json!(8) }
        );

        let custom = Action::custom("flag").execute(&context, &registry);
        assert_eq!(custom, ActionResult::Custom { function: "flag".into(), succeeded: true });
    }

    #[test]
    fn test_action_wire_shape() {
        let action: Action = serde_json::from_value(json!({
            "type": "NOTIFY",
            "target": "planner",
            "message": "Senior missing",
            "metadata": {"priority": "urgent"}
        }))
        .unwrap();
        assert_eq!(action.action_type, ActionType::Notify);
        assert_eq!(action.metadata["priority"], json!("urgent"));
    }
}
