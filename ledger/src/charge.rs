//! Charging work items against their target accounts.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use batchsettle_common::{CallerIdentity, Result, SettleError, Timestamp};
use parking_lot::Mutex;
use tracing::debug;

use crate::settlement::AtomicSettlement;
use crate::work::WorkItem;
use crate::work_ledger::WorkProcessor;

/// Work processor that withdraws each item's amount from its target account.
///
/// A failed drain leaves every item pending, including the ones already
/// charged. The charger remembers what it has charged (by identifier and
/// submission time) so a retried batch does not charge those items twice,
/// and forgets them once their batch settles.
pub struct AccountCharger {
    settlement: Arc<AtomicSettlement>,
    identity: CallerIdentity,
    charged: Mutex<HashSet<(String, Timestamp)>>,
}

impl AccountCharger {
    /// Charge as the system scheduler identity.
    pub fn new(settlement: Arc<AtomicSettlement>) -> Self {
        Self::with_identity(settlement, CallerIdentity::system())
    }

    /// Charge as `identity`.
    pub fn with_identity(settlement: Arc<AtomicSettlement>, identity: CallerIdentity) -> Self {
        Self {
            settlement,
            identity,
            charged: Mutex::new(HashSet::new()),
        }
    }

    /// Items charged whose batch has not settled yet.
    pub fn unsettled_charges(&self) -> usize {
        self.charged.lock().len()
    }
}

#[async_trait]
impl WorkProcessor for AccountCharger {
    async fn process(&self, item: &WorkItem) -> Result<()> {
        let account = item.account().ok_or_else(|| {
            SettleError::invalid(
                "account",
                format!("Work item {} has no target account", item.identifier()),
            )
        })?;

        let key = (item.identifier().to_string(), item.submitted_at());
        if self.charged.lock().contains(&key) {
            debug!(item = %item.identifier(), "Already charged, skipping");
            return Ok(());
        }

        self.settlement
            .charge(&self.identity, account, item.amount(), item.identifier())?;
        self.charged.lock().insert(key);
        Ok(())
    }

    async fn batch_settled(&self, items: &[WorkItem]) {
        let mut charged = self.charged.lock();
        for item in items {
            charged.remove(&(item.identifier().to_string(), item.submitted_at()));
        }
    }
}
