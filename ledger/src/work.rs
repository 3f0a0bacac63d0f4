//! Pending work items.

use batchsettle_common::{now, AccountId, Amount, Result, SettleError, Timestamp};
use serde::{Deserialize, Serialize};

/// One immutable unit of pending work, such as a charge awaiting settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    identifier: String,
    amount: Amount,
    account: Option<AccountId>,
    submitted_at: Timestamp,
}

impl WorkItem {
    /// Create a work item with no target account.
    pub fn new(identifier: impl Into<String>, amount: Amount) -> Self {
        Self {
            identifier: identifier.into(),
            amount,
            account: None,
            submitted_at: now(),
        }
    }

    /// Create a work item charged against `account`.
    pub fn for_account(
        identifier: impl Into<String>,
        account: impl Into<AccountId>,
        amount: Amount,
    ) -> Self {
        Self {
            account: Some(account.into()),
            ..Self::new(identifier, amount)
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// Target account, referenced by identifier only.
    pub fn account(&self) -> Option<&AccountId> {
        self.account.as_ref()
    }

    pub fn submitted_at(&self) -> Timestamp {
        self.submitted_at
    }

    /// Reject items the ledger must not accept.
    pub fn validate(&self) -> Result<()> {
        if self.identifier.trim().is_empty() {
            return Err(SettleError::invalid(
                "identifier",
                "Work item identifier must not be empty",
            ));
        }
        self.amount.ensure_non_negative("amount")?;
        if let Some(account) = &self.account {
            if !account.is_valid() {
                return Err(SettleError::invalid(
                    "account",
                    format!("Work item {} targets invalid account '{account}'", self.identifier),
                ));
            }
        }
        Ok(())
    }
}
