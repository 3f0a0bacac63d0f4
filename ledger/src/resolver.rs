//! Account lookup by identifier.

use batchsettle_common::{AccountId, Amount, OwnerRef, Result, SettleError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::account::{Account, SharedAccount};
use crate::settlement;

/// Maps account identifiers to live, lockable accounts.
pub trait AccountResolver: Send + Sync {
    /// Resolve an account, failing with `AccountNotFound` if unknown.
    fn resolve(&self, id: &AccountId) -> Result<SharedAccount>;
}

/// Thread-safe in-memory account store.
#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    accounts: DashMap<AccountId, SharedAccount>,
}

impl InMemoryAccounts {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account.
    pub fn open(&self, account: Account) -> Result<SharedAccount> {
        if !account.id.is_valid() {
            return Err(SettleError::invalid(
                "account_id",
                format!("Invalid account id '{}'", account.id),
            ));
        }

        match self.accounts.entry(account.id.clone()) {
            Entry::Occupied(_) => Err(SettleError::invalid(
                "account_id",
                format!("Account {} already exists", account.id),
            )),
            Entry::Vacant(slot) => {
                info!(account = %account.id, owner = %account.owner, "Account opened");
                Ok(slot.insert(account.into_shared()).clone())
            }
        }
    }

    /// Register an account funded with an opening balance.
    pub fn open_with_balance(
        &self,
        id: impl Into<AccountId>,
        owner: impl Into<OwnerRef>,
        opening_balance: Amount,
    ) -> Result<SharedAccount> {
        let mut account = Account::new(id, owner);
        settlement::deposit(&mut account, opening_balance)?;
        self.open(account)
    }

    /// Copy of an account's current state.
    pub fn snapshot(&self, id: &AccountId) -> Option<Account> {
        self.accounts.get(id).map(|a| a.lock().clone())
    }

    /// Identifiers of all registered accounts, sorted.
    pub fn ids(&self) -> Vec<AccountId> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Sum of all balances; `None` if it leaves the decimal range.
    pub fn total_balance(&self) -> Option<Amount> {
        Amount::checked_sum(self.accounts.iter().map(|e| e.value().lock().balance()))
    }

    /// Number of registered accounts.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether no account is registered.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

impl AccountResolver for InMemoryAccounts {
    fn resolve(&self, id: &AccountId) -> Result<SharedAccount> {
        self.accounts
            .get(id)
            .map(|a| a.clone())
            .ok_or_else(|| SettleError::AccountNotFound(id.clone()))
    }
}
