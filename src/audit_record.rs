// Activity log entries for rule mutations and conflict resolutions.
//
// Every durable change made through this crate (lifecycle transitions,
// reverts, conflict resolutions) is recorded as an ActivityLogEntry and
// handed to the rule store. Entries carry a SHA-256 provenance hash over
// their content so tampering with a stored entry can be detected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Kind of activity being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    RuleCreated,
    RuleSubmitted,
    RuleActivated,
    RuleUpdated,
    RuleArchived,
    RuleReverted,
    ConflictResolved,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::RuleCreated => "rule_created",
            ActivityAction::RuleSubmitted => "rule_submitted",
            ActivityAction::RuleActivated => "rule_activated",
            ActivityAction::RuleUpdated => "rule_updated",
            ActivityAction::RuleArchived => "rule_archived",
            ActivityAction::RuleReverted => "rule_reverted",
            ActivityAction::ConflictResolved => "conflict_resolved",
        }
    }
}

/// What kind of entity an entry is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Rule,
    Conflict,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Rule => "rule",
            EntityType::Conflict => "conflict",
        }
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub id: String,
    pub action: ActivityAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Operator responsible, `None` for system actions
    pub user_id: Option<String>,
    pub details: Value,
    pub created_at: DateTime<Utc>,
    /// SHA-256 over action, entity type and id, user, details and timestamp
    pub provenance_hash: String,
}

impl ActivityLogEntry {
    pub fn new(
        action: ActivityAction,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        user_id: Option<String>,
        details: Value,
    ) -> Self {
        let mut entry = Self {
            id: Uuid::new_v4().to_string(),
            action,
            entity_type,
            entity_id: entity_id.into(),
            user_id,
            details,
            created_at: Utc::now(),
            provenance_hash: String::new(),
        };
        entry.provenance_hash = entry.compute_provenance_hash();
        entry
    }

    /// Compute provenance hash for tamper detection
    pub fn compute_provenance_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.action.as_str().as_bytes());
        hasher.update(self.entity_type.as_str().as_bytes());
        hasher.update(self.entity_id.as_bytes());
        if let Some(user) = &self.user_id {
            hasher.update(user.as_bytes());
        }
        hasher.update(self.details.to_string().as_bytes());
        hasher.update(self.created_at.timestamp_millis().to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn verify_provenance(&self) -> bool {
        self.compute_provenance_hash() == self.provenance_hash
    }
}
