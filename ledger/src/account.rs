//! Balance-holding accounts.

use std::sync::Arc;

use batchsettle_common::{AccountId, Amount, OwnerRef, Timestamp};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// An account shared between the resolver and the settlement service.
pub type SharedAccount = Arc<Mutex<Account>>;

/// A balance-holding account.
///
/// The balance is never negative. It only changes through the settlement
/// primitives in [`crate::settlement`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Identity that owns the account.
    pub owner: OwnerRef,
    balance: Amount,
    /// When the account was created.
    pub created_at: Timestamp,
    /// When the balance last changed.
    pub updated_at: Timestamp,
}

impl Account {
    /// Create an empty account.
    pub fn new(id: impl Into<AccountId>, owner: impl Into<OwnerRef>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner: owner.into(),
            balance: Amount::ZERO,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current balance.
    pub fn balance(&self) -> Amount {
        self.balance
    }

    /// Wrap the account for shared, lockable access.
    pub fn into_shared(self) -> SharedAccount {
        Arc::new(Mutex::new(self))
    }

    pub(crate) fn set_balance(&mut self, balance: Amount) {
        self.balance = balance;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_is_empty() {
        let account = Account::new("A", "alice");
        assert_eq!(account.balance(), Amount::ZERO);
        assert_eq!(account.owner.as_str(), "alice");
        assert_eq!(account.created_at, account.updated_at);
    }
}
