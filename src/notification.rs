//! Outbound rule events.
//!
//! The engine writes [`RuleEvent`]s to a [`ViolationBus`] backed by a
//! `tokio::sync::broadcast` channel. Publishing never blocks and never fails,
//! so evaluation does not depend on anyone listening. A
//! [`NotificationDispatcher`] subscribes to the bus and forwards violations
//! to an external [`ViolationNotifier`], swallowing delivery failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::action_clause::NotificationSeverity;
use crate::conflict::RuleConflict;
use crate::config::DEFAULT_EVENT_CAPACITY;
use crate::engine::EvaluationResult;
use crate::rule_metadata::RuleId;

/// A failed validation evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationEvent {
    pub result: EvaluationResult,
    pub severity: NotificationSeverity,
    pub occurred_at: DateTime<Utc>,
}

/// Everything the engine publishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuleEvent {
    Violation(ViolationEvent),
    ConflictsDetected {
        rule_id: RuleId,
        conflicts: Vec<RuleConflict>,
        detected_at: DateTime<Utc>,
    },
}

/// In-process fan-out bus for [`RuleEvent`]s.
#[derive(Debug, Clone)]
pub struct ViolationBus {
    sender: broadcast::Sender<RuleEvent>,
}

impl ViolationBus {
    /// When the buffer is full the oldest events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: RuleEvent) {
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ViolationBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// External channel that pushes violation alerts to connected clients.
#[async_trait]
pub trait ViolationNotifier: Send + Sync {
    async fn send_violation(
        &self,
        event: &ViolationEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Forwards violation events from the bus to a notifier.
pub struct NotificationDispatcher {
    notifier: Arc<dyn ViolationNotifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn ViolationNotifier>) -> Self {
        Self { notifier }
    }

    /// Subscribe to `bus` and run the dispatch loop on a tokio task.
    pub fn spawn(self, bus: &ViolationBus) -> JoinHandle<()> {
        let receiver = bus.subscribe();
        tokio::spawn(self.run(receiver))
    }

    /// Exits when the bus is dropped.
    pub async fn run(self, mut receiver: broadcast::Receiver<RuleEvent>) {
        loop {
            match receiver.recv().await {
                Ok(RuleEvent::Violation(event)) => {
                    if let Err(e) = self.notifier.send_violation(&event).await {
                        warn!(
                            "Failed to deliver violation for rule {}: {}",
                            event.result.rule_id, e
                        );
                    }
                }
                Ok(RuleEvent::ConflictsDetected { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Notification dispatcher lagged, skipped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Violation bus closed, notification dispatcher shutting down");
                    break;
                }
            }
        }
    }
}
