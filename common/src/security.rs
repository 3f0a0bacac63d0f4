//! Caller identities and the role check guarding sensitive operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::{Result, SettleError};

/// A named role.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Role(String);

impl Role {
    /// Account holders acting on their own accounts.
    pub const CUSTOMER: &'static str = "customer";
    /// Staff allowed to move money on behalf of customers.
    pub const TELLER: &'static str = "teller";
    /// The scheduler charging pending work items.
    pub const SCHEDULER: &'static str = "scheduler";

    /// Create a role from its name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the role name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A set of roles.
pub type RoleSet = BTreeSet<Role>;

/// Build a role set from names.
pub fn roles<I, S>(names: I) -> RoleSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Role::new).collect()
}

/// Who is calling, and with which roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Principal name.
    pub principal: String,
    /// Roles granted to the principal.
    pub roles: RoleSet,
}

impl CallerIdentity {
    /// Create a caller with the given roles.
    pub fn new<I, S>(principal: impl Into<String>, role_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principal: principal.into(),
            roles: roles(role_names),
        }
    }

    /// Caller with no roles at all.
    pub fn anonymous() -> Self {
        Self {
            principal: "anonymous".to_string(),
            roles: RoleSet::new(),
        }
    }

    /// The identity the scheduler uses when charging work items.
    pub fn system() -> Self {
        Self::new("system", [Role::SCHEDULER])
    }

    /// Check if the caller holds `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == role)
    }
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny,
}

/// Decide whether `caller` may perform an operation requiring `required`.
///
/// An empty requirement allows everyone; otherwise any one matching role is
/// enough.
pub fn check_access(caller: &CallerIdentity, required: &RoleSet) -> AccessDecision {
    if required.is_empty() || required.iter().any(|r| caller.roles.contains(r)) {
        AccessDecision::Allow
    } else {
        AccessDecision::Deny
    }
}

/// [`check_access`] as a `Result`, naming `operation` on denial.
pub fn authorize(caller: &CallerIdentity, required: &RoleSet, operation: &str) -> Result<()> {
    match check_access(caller, required) {
        AccessDecision::Allow => Ok(()),
        AccessDecision::Deny => Err(SettleError::Unauthorized {
            principal: caller.principal.clone(),
            operation: operation.to_string(),
        }),
    }
}
