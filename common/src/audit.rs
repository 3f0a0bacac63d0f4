//! Append-only audit log shared by settlement and scheduling components.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{now, AccountId, Amount, EventId, Timestamp};

/// Type of balance change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceChangeType {
    /// Credit (increase).
    Credit,
    /// Debit (decrease).
    Debit,
}

/// Balance change event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Account affected.
    pub account_id: AccountId,
    /// Change type.
    pub change_type: BalanceChangeType,
    /// Amount changed.
    pub amount: Amount,
    /// Balance before change.
    pub balance_before: Amount,
    /// Balance after change.
    pub balance_after: Amount,
    /// What caused the change (operation or work item identifier).
    pub reference: String,
}

/// What an audit event records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditKind {
    BalanceChanged(BalanceChange),
    ItemAdded { item: String, amount: Amount },
    ItemDiscarded { item: String },
    BatchSettled { items: usize, total: Amount },
    BatchFailed { item: String, reason: String },
    FireFailed { trigger: String, reason: String },
    AccessDenied { principal: String, operation: String },
}

/// A single audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: EventId,
    pub at: Timestamp,
    #[serde(flatten)]
    pub kind: AuditKind,
}

/// Thread-safe, append-only event log.
///
/// Passed explicitly to every component that records events.
#[derive(Debug, Default)]
pub struct AuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl AuditLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event stamped with the current time.
    pub fn record(&self, kind: AuditKind) {
        self.record_at(now(), kind);
    }

    /// Append an event stamped with `at`.
    pub fn record_at(&self, at: Timestamp, kind: AuditKind) {
        self.events.write().push(AuditEvent {
            id: EventId::new(),
            at,
            kind,
        });
    }

    /// Snapshot of every event recorded so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Snapshot of the events matching `filter`.
    pub fn filter<F>(&self, filter: F) -> Vec<AuditEvent>
    where
        F: Fn(&AuditKind) -> bool,
    {
        self.events
            .read()
            .iter()
            .filter(|e| filter(&e.kind))
            .cloned()
            .collect()
    }

    /// Balance changes recorded for one account, oldest first.
    pub fn balance_changes(&self, account_id: &AccountId) -> Vec<BalanceChange> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match &e.kind {
                AuditKind::BalanceChanged(change) if &change.account_id == account_id => {
                    Some(change.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Number of events recorded.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}
