//! Error types for BatchSettle.

use thiserror::Error;

use crate::{AccountId, Amount};

/// Main error type for BatchSettle operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettleError {
    /// Malformed input: negative amount, empty identifier, empty expression.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        message: String,
        field: Option<String>,
    },

    /// Withdrawal larger than the available balance.
    #[error("Insufficient balance on {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        account: AccountId,
        requested: Amount,
        available: Amount,
    },

    /// A work item failed while its batch was being drained.
    #[error("Processing failed for item {item}: {reason}")]
    ProcessingFailure { item: String, reason: String },

    /// An item with the same identifier is already pending.
    #[error("Duplicate work item: {0}")]
    DuplicateItem(String),

    /// Account could not be resolved.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Caller lacks every role required by the operation.
    #[error("{principal} is not authorized to {operation}")]
    Unauthorized { principal: String, operation: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A timer could not be armed.
    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),
}

impl SettleError {
    /// Shorthand for an `InvalidArgument` tied to a field.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        SettleError::InvalidArgument {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Check if this error is retryable.
    ///
    /// Only processing failures are worth another attempt; the next drain
    /// picks the same items up again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SettleError::ProcessingFailure { .. })
    }

    /// Get a stable error code for logs and reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            SettleError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            SettleError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            SettleError::ProcessingFailure { .. } => "PROCESSING_FAILURE",
            SettleError::DuplicateItem(_) => "DUPLICATE_ITEM",
            SettleError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            SettleError::Unauthorized { .. } => "UNAUTHORIZED",
            SettleError::ConfigurationError(_) => "CONFIGURATION_ERROR",
            SettleError::SchedulerUnavailable(_) => "SCHEDULER_UNAVAILABLE",
        }
    }
}

/// Result type alias for BatchSettle operations.
pub type Result<T> = std::result::Result<T, SettleError>;
