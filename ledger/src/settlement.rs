//! All-or-nothing settlement between balance-holding accounts.
//!
//! The module-level functions are the primitives and operate on accounts the
//! caller already holds. [`AtomicSettlement`] wraps them with role checks,
//! account resolution, locking and audit records.

use std::sync::Arc;

use batchsettle_common::{
    authorize, AccountId, Amount, AuditKind, AuditLog, BalanceChange, BalanceChangeType,
    CallerIdentity, Result, Role, RoleSet, SettleError,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::account::Account;
use crate::resolver::AccountResolver;

/// Credit `amount` to `account`; returns the new balance.
///
/// Fails with `InvalidArgument` for negative amounts or when the new balance
/// would leave the decimal range. The balance is untouched on failure.
pub fn deposit(account: &mut Account, amount: Amount) -> Result<Amount> {
    let amount = amount.ensure_non_negative("amount")?;
    let balance = account.balance().checked_add(amount).ok_or_else(|| {
        SettleError::invalid(
            "amount",
            format!("Deposit of {amount} overflows the balance of {}", account.id),
        )
    })?;
    account.set_balance(balance);
    Ok(balance)
}

/// Debit `amount` from `account`; returns the new balance.
///
/// Withdrawing the entire balance is allowed. Anything above it fails with
/// `InsufficientBalance` and leaves the balance untouched.
pub fn withdraw(account: &mut Account, amount: Amount) -> Result<Amount> {
    let amount = amount.ensure_non_negative("amount")?;
    let available = account.balance();
    if amount > available {
        return Err(SettleError::InsufficientBalance {
            account: account.id.clone(),
            requested: amount,
            available,
        });
    }
    let balance = available.checked_sub(amount).ok_or_else(|| {
        SettleError::invalid(
            "amount",
            format!("Withdrawal of {amount} underflows the balance of {}", account.id),
        )
    })?;
    account.set_balance(balance);
    Ok(balance)
}

/// Result of a completed transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
    /// Source balance after the transfer.
    pub from_balance: Amount,
    /// Destination balance after the transfer.
    pub to_balance: Amount,
}

/// Move `amount` from `from` to `to`.
///
/// Either both balances change or neither does: a failed withdrawal never
/// reaches the deposit, and a failed deposit restores the source account.
pub fn transfer(from: &mut Account, to: &mut Account, amount: Amount) -> Result<TransferReceipt> {
    let from_before = from.clone();
    let from_balance = withdraw(from, amount)?;

    match deposit(to, amount) {
        Ok(to_balance) => Ok(TransferReceipt {
            from: from.id.clone(),
            to: to.id.clone(),
            amount,
            from_balance,
            to_balance,
        }),
        Err(e) => {
            *from = from_before;
            Err(e)
        }
    }
}

/// Roles required per settlement operation.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementPolicy {
    pub deposit: RoleSet,
    pub withdraw: RoleSet,
    pub transfer: RoleSet,
}

impl SettlementPolicy {
    /// A policy with no role requirements.
    pub fn open() -> Self {
        Self {
            deposit: RoleSet::new(),
            withdraw: RoleSet::new(),
            transfer: RoleSet::new(),
        }
    }
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            deposit: batchsettle_common::roles([Role::CUSTOMER, Role::TELLER]),
            withdraw: batchsettle_common::roles([Role::CUSTOMER, Role::TELLER, Role::SCHEDULER]),
            transfer: batchsettle_common::roles([Role::CUSTOMER, Role::TELLER]),
        }
    }
}

/// Settlement service over resolved accounts.
pub struct AtomicSettlement {
    resolver: Arc<dyn AccountResolver>,
    audit: Arc<AuditLog>,
    policy: SettlementPolicy,
}

impl AtomicSettlement {
    /// Create a service with the default policy.
    pub fn new(resolver: Arc<dyn AccountResolver>, audit: Arc<AuditLog>) -> Self {
        Self {
            resolver,
            audit,
            policy: SettlementPolicy::default(),
        }
    }

    /// Replace the role policy.
    pub fn with_policy(mut self, policy: SettlementPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current balance of an account.
    pub fn balance(&self, account_id: &AccountId) -> Result<Amount> {
        Ok(self.resolver.resolve(account_id)?.lock().balance())
    }

    /// Credit an account.
    #[instrument(skip(self, caller), fields(principal = %caller.principal))]
    pub fn deposit(
        &self,
        caller: &CallerIdentity,
        account_id: &AccountId,
        amount: Amount,
    ) -> Result<Amount> {
        self.check(caller, &self.policy.deposit, "deposit")?;

        let account = self.resolver.resolve(account_id)?;
        let mut account = account.lock();
        let before = account.balance();
        let after = deposit(&mut account, amount)?;

        self.record_change(account_id, BalanceChangeType::Credit, amount, before, after, "deposit");
        info!(account = %account_id, amount = %amount, balance = %after, "Deposit settled");
        Ok(after)
    }

    /// Debit an account.
    pub fn withdraw(
        &self,
        caller: &CallerIdentity,
        account_id: &AccountId,
        amount: Amount,
    ) -> Result<Amount> {
        self.charge(caller, account_id, amount, "withdraw")
    }

    /// Debit an account, recording `reference` as the cause.
    ///
    /// Governed by the withdraw policy.
    #[instrument(skip(self, caller), fields(principal = %caller.principal))]
    pub fn charge(
        &self,
        caller: &CallerIdentity,
        account_id: &AccountId,
        amount: Amount,
        reference: &str,
    ) -> Result<Amount> {
        self.check(caller, &self.policy.withdraw, "withdraw")?;

        let account = self.resolver.resolve(account_id)?;
        let mut account = account.lock();
        let before = account.balance();
        let after = withdraw(&mut account, amount).map_err(|e| {
            warn!(account = %account_id, amount = %amount, error = %e, "Withdrawal rejected");
            e
        })?;

        self.record_change(account_id, BalanceChangeType::Debit, amount, before, after, reference);
        info!(account = %account_id, amount = %amount, balance = %after, "Withdrawal settled");
        Ok(after)
    }

    /// Move funds between two distinct accounts.
    #[instrument(skip(self, caller), fields(principal = %caller.principal))]
    pub fn transfer(
        &self,
        caller: &CallerIdentity,
        from_id: &AccountId,
        to_id: &AccountId,
        amount: Amount,
    ) -> Result<TransferReceipt> {
        self.check(caller, &self.policy.transfer, "transfer")?;

        if from_id == to_id {
            return Err(SettleError::invalid(
                "to",
                "Source and destination accounts must be different",
            ));
        }

        let from = self.resolver.resolve(from_id)?;
        let to = self.resolver.resolve(to_id)?;

        // Lock in id order so opposite transfers cannot deadlock.
        let (mut from_guard, mut to_guard) = if from_id < to_id {
            let f = from.lock();
            let t = to.lock();
            (f, t)
        } else {
            let t = to.lock();
            let f = from.lock();
            (f, t)
        };

        let from_before = from_guard.balance();
        let to_before = to_guard.balance();

        let receipt = transfer(&mut from_guard, &mut to_guard, amount).map_err(|e| {
            warn!(from = %from_id, to = %to_id, amount = %amount, error = %e, "Transfer rolled back");
            e
        })?;

        self.record_change(
            from_id,
            BalanceChangeType::Debit,
            amount,
            from_before,
            receipt.from_balance,
            "transfer",
        );
        self.record_change(
            to_id,
            BalanceChangeType::Credit,
            amount,
            to_before,
            receipt.to_balance,
            "transfer",
        );

        info!(from = %from_id, to = %to_id, amount = %amount, "Transfer settled");
        Ok(receipt)
    }

    fn check(&self, caller: &CallerIdentity, required: &RoleSet, operation: &str) -> Result<()> {
        authorize(caller, required, operation).map_err(|e| {
            warn!(principal = %caller.principal, operation, "Access denied");
            self.audit.record(AuditKind::AccessDenied {
                principal: caller.principal.clone(),
                operation: operation.to_string(),
            });
            e
        })
    }

    fn record_change(
        &self,
        account_id: &AccountId,
        change_type: BalanceChangeType,
        amount: Amount,
        balance_before: Amount,
        balance_after: Amount,
        reference: &str,
    ) {
        self.audit.record(AuditKind::BalanceChanged(BalanceChange {
            account_id: account_id.clone(),
            change_type,
            amount,
            balance_before,
            balance_after,
            reference: reference.to_string(),
        }));
    }
}
