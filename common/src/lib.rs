//! BatchSettle Common Types
//!
//! Shared types used across the BatchSettle workspace: the error taxonomy,
//! identifiers, monetary amounts, time and clock abstractions, the audit
//! log and the role check.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;
pub mod audit;
pub mod security;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
pub use audit::*;
pub use security::*;
