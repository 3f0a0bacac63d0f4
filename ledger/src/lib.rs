//! BatchSettle Ledger
//!
//! Balance-holding accounts, all-or-nothing settlement between them, and the
//! pending work ledger that accumulates items until a batch is drained.

pub mod account;
pub mod settlement;
pub mod resolver;
pub mod work;
pub mod work_ledger;
pub mod charge;

pub use account::{Account, SharedAccount};
pub use settlement::{AtomicSettlement, SettlementPolicy, TransferReceipt};
pub use resolver::{AccountResolver, InMemoryAccounts};
pub use work::WorkItem;
pub use work_ledger::{DrainReport, FnProcessor, WorkLedger, WorkProcessor};
pub use charge::AccountCharger;
