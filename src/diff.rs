// Structural diff between two rule snapshots.
//
// A rule is flattened into an ordered list of (path, leaf value) pairs over
// its typed fields, so every path is known statically. Sets and free-form
// JSON values (`value`, `metadata.<key>`) are leaves. Unpopulated leaves
// (empty strings/collections, absent options) are omitted, which turns
// "" -> "x" into an add and "x" -> "" into a delete.
//
// Bookkeeping fields (id, version, updatedBy, metrics) never show up.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use crate::action_clause::Action;
use crate::match_clause::{stringify, Condition};
use crate::rule_metadata::Rule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Modify,
    Delete,
}

/// One leaf-level difference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleChange {
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
}

impl RuleChange {
    /// Top-level field the change belongs to (`conditions[0].value` -> `conditions`).
    pub fn root_field(&self) -> &str {
        let end = self.field.find(|c: char| c == '.' || c == '[').unwrap_or(self.field.len());
        &self.field[..end]
    }
}

/// Counts of each change type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCounts {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
}

impl ChangeCounts {
    pub fn of(changes: &[RuleChange]) -> Self {
        let mut counts = Self::default();
        for change in changes {
            match change.change_type {
                ChangeType::Add => counts.added += 1,
                ChangeType::Modify => counts.modified += 1,
                ChangeType::Delete => counts.deleted += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.added + self.modified + self.deleted
    }
}

// ============================================================================
// Flattening
// ============================================================================

type Leaves = Vec<(String, Value)>;

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn is_populated(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn push(leaves: &mut Leaves, path: impl Into<String>, value: Value) {
    if is_populated(&value) {
        leaves.push((path.into(), value));
    }
}

fn flatten_condition(leaves: &mut Leaves, prefix: &str, condition: &Condition) {
    let Condition {
        field,
        operator,
        value,
        custom_function,
    } = condition;
    push(leaves, format!("{}.field", prefix), to_json(field));
    push(leaves, format!("{}.operator", prefix), to_json(operator));
    push(leaves, format!("{}.value", prefix), to_json(value));
    push(leaves, format!("{}.customFunction", prefix), to_json(custom_function));
}

fn flatten_action(leaves: &mut Leaves, prefix: &str, action: &Action) {
    let Action {
        action_type,
        target,
        value,
        message,
        metadata,
        custom_function,
    } = action;
    push(leaves, format!("{}.type", prefix), to_json(action_type));
    push(leaves, format!("{}.target", prefix), to_json(target));
    push(leaves, format!("{}.value", prefix), to_json(value));
    push(leaves, format!("{}.message", prefix), to_json(message));
    for (key, entry) in metadata {
        push(leaves, format!("{}.metadata.{}", prefix, key), entry.clone());
    }
    push(leaves, format!("{}.customFunction", prefix), to_json(custom_function));
}

/// Populated leaves of `rule` in declaration order.
fn flatten(rule: &Rule) -> Leaves {
    // Exhaustive destructuring: a new Rule field must be classified here.
    let Rule {
        id: _,
        name,
        description,
        rule_type,
        priority,
        enabled,
        status,
        version: _,
        conditions,
        condition_groups,
        actions,
        effective_date,
        expiration_date,
        tags,
        contexts,
        created_by,
        updated_by: _,
        exceptions,
        metrics: _,
    } = rule;

    let mut leaves = Vec::new();
    push(&mut leaves, "name", to_json(name));
    push(&mut leaves, "description", to_json(description));
    push(&mut leaves, "type", to_json(rule_type));
    push(&mut leaves, "priority", to_json(priority));
    push(&mut leaves, "enabled", to_json(enabled));
    push(&mut leaves, "status", to_json(status));
    for (i, condition) in conditions.iter().enumerate() {
        flatten_condition(&mut leaves, &format!("conditions[{}]", i), condition);
    }
    for (g, group) in condition_groups.iter().enumerate() {
        push(&mut leaves, format!("conditionGroups[{}].operator", g), to_json(&group.operator));
        for (i, condition) in group.conditions.iter().enumerate() {
            flatten_condition(&mut leaves, &format!("conditionGroups[{}].conditions[{}]", g, i), condition);
        }
    }
    for (i, action) in actions.iter().enumerate() {
        flatten_action(&mut leaves, &format!("actions[{}]", i), action);
    }
    push(&mut leaves, "effectiveDate", to_json(effective_date));
    push(&mut leaves, "expirationDate", to_json(expiration_date));
    push(&mut leaves, "tags", to_json(tags));
    push(&mut leaves, "contexts", to_json(contexts));
    push(&mut leaves, "createdBy", to_json(created_by));
    for (i, exception) in exceptions.iter().enumerate() {
        push(&mut leaves, format!("exceptions[{}]", i), to_json(exception));
    }
    leaves
}

// ============================================================================
// Diffing
// ============================================================================

/// Every populated field of `rule` as an `add` change.
pub fn collect_populated(rule: &Rule) -> Vec<RuleChange> {
    flatten(rule)
        .into_iter()
        .map(|(field, value)| RuleChange {
            field,
            old_value: None,
            new_value: Some(value),
            change_type: ChangeType::Add,
        })
        .collect()
}

/// Changes turning `old` into `new`: adds and modifies in `new`'s field
/// order, then deletes in `old`'s.
pub fn diff_rules(old: &Rule, new: &Rule) -> Vec<RuleChange> {
    let old_leaves = flatten(old);
    let new_leaves = flatten(new);
    let old_index: HashMap<&str, &Value> = old_leaves.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let new_index: HashMap<&str, &Value> = new_leaves.iter().map(|(k, v)| (k.as_str(), v)).collect();

    let mut changes = Vec::new();
    for (field, value) in &new_leaves {
        match old_index.get(field.as_str()) {
            None => changes.push(RuleChange {
                field: field.clone(),
                old_value: None,
                new_value: Some(value.clone()),
                change_type: ChangeType::Add,
            }),
            Some(previous) if *previous != value => changes.push(RuleChange {
                field: field.clone(),
                old_value: Some((*previous).clone()),
                new_value: Some(value.clone()),
                change_type: ChangeType::Modify,
            }),
            Some(_) => {}
        }
    }
    for (field, value) in &old_leaves {
        if !new_index.contains_key(field.as_str()) {
            changes.push(RuleChange {
                field: field.clone(),
                old_value: Some(value.clone()),
                new_value: None,
                change_type: ChangeType::Delete,
            });
        }
    }
    changes
}

/// `"3 added, 1 modified, 0 deleted"`, or `"No changes"`.
pub fn summarize_counts(changes: &[RuleChange]) -> String {
    let counts = ChangeCounts::of(changes);
    if counts.total() == 0 {
        return "No changes".to_string();
    }
    format!(
        "{} added, {} modified, {} deleted",
        counts.added, counts.modified, counts.deleted
    )
}

/// Human-readable summary that mentions name, status, condition and action
/// changes first, then everything else.
pub fn describe_changes(changes: &[RuleChange]) -> String {
    if changes.is_empty() {
        return "No changes".to_string();
    }

    let mut by_root: BTreeMap<&str, usize> = BTreeMap::new();
    for change in changes {
        *by_root.entry(change.root_field()).or_default() += 1;
    }

    let mut parts = Vec::new();
    if let Some(change) = changes.iter().find(|c| c.field == "name") {
        parts.push(match (&change.old_value, &change.new_value) {
            (Some(old), Some(new)) => format!("Renamed from \"{}\" to \"{}\"", stringify(old), stringify(new)),
            _ => "Name changed".to_string(),
        });
    }
    if let Some(change) = changes.iter().find(|c| c.field == "status") {
        let new = change.new_value.as_ref().map(stringify).unwrap_or_default();
        parts.push(format!("Status changed to {}", new));
    }
    for (root, label) in [("conditions", "condition"), ("conditionGroups", "condition group"), ("actions", "action")] {
        if let Some(count) = by_root.remove(root) {
            parts.push(format!("{} {} field(s) changed", count, label));
        }
    }
    by_root.remove("name");
    by_root.remove("status");
    if !by_root.is_empty() {
        let others: Vec<&str> = by_root.keys().copied().collect();
        parts.push(format!("Also changed: {}", others.join(", ")));
    }
    parts.join("; ")
}

// ============================================================================
// Rendering
// ============================================================================

/// Unified-diff style text: unchanged leaves are indented, removed leaves
/// start with `-`, added with `+`; a modified leaf shows both lines.
pub fn render_unified(old: &Rule, new: &Rule, old_label: &str, new_label: &str) -> String {
    let old_leaves = flatten(old);
    let new_leaves = flatten(new);
    let new_index: HashMap<&str, &Value> = new_leaves.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let old_index: HashMap<&str, &Value> = old_leaves.iter().map(|(k, v)| (k.as_str(), v)).collect();

    let mut out = format!("--- {}\n+++ {}\n", old_label, new_label);
    for (field, value) in &old_leaves {
        match new_index.get(field.as_str()) {
            Some(current) if *current == value => {
                out.push_str(&format!("  {}: {}\n", field, value));
            }
            Some(current) => {
                out.push_str(&format!("- {}: {}\n", field, value));
                out.push_str(&format!("+ {}: {}\n", field, current));
            }
            None => out.push_str(&format!("- {}: {}\n", field, value)),
        }
    }
    for (field, value) in &new_leaves {
        if !old_index.contains_key(field.as_str()) {
            out.push_str(&format!("+ {}: {}\n", field, value));
        }
    }
    out
}
