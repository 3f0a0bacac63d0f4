//! The pending work ledger and batch draining.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use batchsettle_common::{now, Amount, AuditKind, AuditLog, Result, SettleError, Timestamp};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::work::WorkItem;

/// Processes one work item during a drain.
///
/// Returning an error, or panicking, aborts the whole drain.
#[async_trait]
pub trait WorkProcessor: Send + Sync {
    async fn process(&self, item: &WorkItem) -> Result<()>;

    /// Called once after a drain has removed `items` from the ledger.
    async fn batch_settled(&self, _items: &[WorkItem]) {}
}

/// Adapts a synchronous closure into a [`WorkProcessor`].
pub struct FnProcessor<F> {
    f: F,
}

impl<F> FnProcessor<F>
where
    F: Fn(&WorkItem) -> Result<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> WorkProcessor for FnProcessor<F>
where
    F: Fn(&WorkItem) -> Result<()> + Send + Sync,
{
    async fn process(&self, item: &WorkItem) -> Result<()> {
        (self.f)(item)
    }
}

/// Outcome of a successful drain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Identifiers of the settled items, in processing order.
    pub items: Vec<String>,
    /// Sum of the settled amounts.
    pub total: Amount,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
}

impl DrainReport {
    /// Number of items settled.
    pub fn processed(&self) -> usize {
        self.items.len()
    }
}

#[derive(Debug)]
struct Pending {
    seq: u64,
    item: WorkItem,
}

#[derive(Debug, Default)]
struct Inner {
    items: Vec<Pending>,
    identifiers: HashSet<String>,
    /// Sum of pending amounts; always representable.
    total: Amount,
    next_seq: u64,
}

/// Ordered queue of pending work items, drained as all-or-nothing batches.
pub struct WorkLedger {
    inner: RwLock<Inner>,
    /// Serializes drains; held across processing.
    drain_lock: tokio::sync::Mutex<()>,
    audit: Arc<AuditLog>,
}

impl WorkLedger {
    /// Create an empty ledger recording into `audit`.
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            drain_lock: tokio::sync::Mutex::new(()),
            audit,
        }
    }

    /// Append an item to the end of the ledger.
    ///
    /// Rejects an item whose amount would push the pending total out of the
    /// decimal range.
    pub fn add(&self, item: WorkItem) -> Result<()> {
        item.validate()?;

        let (identifier, amount) = (item.identifier().to_string(), item.amount());
        {
            let mut inner = self.inner.write();
            if inner.identifiers.contains(&identifier) {
                return Err(SettleError::DuplicateItem(identifier));
            }
            let pending_total = inner.total;
            inner.total = pending_total.checked_add(amount).ok_or_else(|| {
                SettleError::invalid(
                    "amount",
                    format!("Adding {identifier} overflows the pending total of {pending_total}"),
                )
            })?;
            inner.identifiers.insert(identifier.clone());
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.items.push(Pending { seq, item });
        }

        debug!(item = %identifier, amount = %amount, "Work item added");
        self.audit.record(AuditKind::ItemAdded {
            item: identifier,
            amount,
        });
        Ok(())
    }

    /// Snapshot of the pending items in insertion order.
    pub fn pending_items(&self) -> Vec<WorkItem> {
        self.inner.read().items.iter().map(|p| p.item.clone()).collect()
    }

    /// Remove a pending item without processing it.
    ///
    /// An item already captured by an in-flight drain is still processed by
    /// that drain.
    pub fn discard(&self, identifier: &str) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            match inner.items.iter().position(|p| p.item.identifier() == identifier) {
                Some(index) => {
                    let pending = inner.items.remove(index);
                    inner.identifiers.remove(identifier);
                    inner.total = inner
                        .total
                        .checked_sub(pending.item.amount())
                        .unwrap_or(Amount::ZERO);
                    true
                }
                None => false,
            }
        };

        if removed {
            info!(item = %identifier, "Work item discarded");
            self.audit.record(AuditKind::ItemDiscarded {
                item: identifier.to_string(),
            });
        }
        removed
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    /// Process every currently pending item, in order, as one batch.
    ///
    /// The items are removed only if all of them succeed. On the first
    /// failure the drain stops, nothing is removed and a
    /// `ProcessingFailure` naming the item is returned. Items added while
    /// the batch is processing are left for the next drain.
    #[instrument(skip(self, processor))]
    pub async fn drain_and_process(&self, processor: &dyn WorkProcessor) -> Result<DrainReport> {
        let _drain = self.drain_lock.lock().await;
        let started_at = now();

        let (snapshot, high_water) = {
            let inner = self.inner.read();
            let snapshot: Vec<WorkItem> = inner.items.iter().map(|p| p.item.clone()).collect();
            (snapshot, inner.items.last().map(|p| p.seq))
        };

        let Some(total) = Amount::checked_sum(snapshot.iter().map(WorkItem::amount)) else {
            warn!(pending = snapshot.len(), "Batch total out of range, drain refused");
            return Err(SettleError::invalid(
                "amount",
                "Pending batch total is out of the decimal range",
            ));
        };

        let Some(high_water) = high_water else {
            debug!("Nothing to drain");
            return Ok(DrainReport {
                items: Vec::new(),
                total: Amount::ZERO,
                started_at,
                finished_at: now(),
            });
        };

        for item in &snapshot {
            let outcome = AssertUnwindSafe(processor.process(item))
                .catch_unwind()
                .await;

            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            warn!(
                item = %item.identifier(),
                pending = snapshot.len(),
                reason = %reason,
                "Drain aborted, batch left pending"
            );
            self.audit.record(AuditKind::BatchFailed {
                item: item.identifier().to_string(),
                reason: reason.clone(),
            });
            return Err(SettleError::ProcessingFailure {
                item: item.identifier().to_string(),
                reason,
            });
        }

        {
            let mut inner = self.inner.write();
            let Inner {
                items,
                identifiers,
                total: pending_total,
                ..
            } = &mut *inner;
            items.retain(|p| {
                let settled = p.seq <= high_water;
                if settled {
                    identifiers.remove(p.item.identifier());
                    *pending_total = pending_total
                        .checked_sub(p.item.amount())
                        .unwrap_or(Amount::ZERO);
                }
                !settled
            });
        }

        processor.batch_settled(&snapshot).await;

        let items: Vec<String> = snapshot
            .iter()
            .map(|i| i.identifier().to_string())
            .collect();

        info!(items = items.len(), total = %total, "Batch settled");
        self.audit.record(AuditKind::BatchSettled {
            items: items.len(),
            total,
        });

        Ok(DrainReport {
            items,
            total,
            started_at,
            finished_at: now(),
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("processor panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("processor panicked: {message}")
    } else {
        "processor panicked".to_string()
    }
}
