//! Error types for the softphone core
//!
//! Errors fall into two groups:
//!
//! - **Synchronous rejections** - an operation was illegal for the current
//!   state or its arguments were malformed. These are returned immediately
//!   and never change any Account or Call state.
//! - **Adapter failures** - the native SIP engine refused a command. When the
//!   engine reports a failure asynchronously (registration rejected, call
//!   failed) it is surfaced as a terminal status transition plus a
//!   notification, not as an `Err` from the call that started it.
//!
//! # Handling errors
//!
//! ```rust,no_run
//! # use rvoip_softphone_core::{Call, ClientError};
//! # async fn example(call: Call) {
//! match call.send_dtmf_digits("123").await {
//!     Ok(()) => {}
//!     Err(ClientError::InvalidCallState { current, .. }) => {
//!         println!("cannot send digits while {current}");
//!     }
//!     Err(e) => eprintln!("DTMF failed ({}): {e}", e.category()),
//! }
//! # }
//! ```

use thiserror::Error;

use crate::account::AccountStatus;
use crate::call::{CallKey, CallStatus};

/// Result type alias for softphone operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors produced by Account, Call and runtime operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    /// Configuration is incomplete or malformed
    #[error("Invalid configuration: {field} - {reason}")]
    Configuration { field: String, reason: String },

    /// `configure` was called on an account that is already configured
    #[error("Account is already configured")]
    AlreadyConfigured,

    /// An operation that needs a configured account was called before `configure`
    #[error("Account is not configured")]
    NotConfigured,

    /// The operation is not legal for the account's current status
    #[error("Invalid account state: operation not allowed while {current}")]
    InvalidAccountState { current: AccountStatus },

    /// The operation is not legal for the call's current status
    #[error("Invalid call state for call {call}: operation not allowed while {current}")]
    InvalidCallState { call: CallKey, current: CallStatus },

    /// A destination, identity or control value was malformed
    #[error("Invalid argument: {field} - {reason}")]
    InvalidArgument { field: String, reason: String },

    /// The native engine rejected a command or reported a failure
    #[error("SIP engine failure: {reason}")]
    AdapterFailure { reason: String },

    /// The account has been torn down
    #[error("Account has been closed")]
    AccountGone,

    /// Too many accounts are registering or registered at once
    #[error("Active account limit reached: at most {limit} account(s) may be active")]
    AccountLimitReached { limit: usize },

    /// The serialized execution context is no longer running
    #[error("Session runtime has stopped")]
    RuntimeStopped,
}

impl ClientError {
    /// Create a configuration error
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an adapter failure
    pub fn adapter_failure(reason: impl Into<String>) -> Self {
        Self::AdapterFailure {
            reason: reason.into(),
        }
    }

    /// Check if the error is a state precondition violation
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            ClientError::NotConfigured
                | ClientError::InvalidAccountState { .. }
                | ClientError::InvalidCallState { .. }
        )
    }

    /// Check if retrying the same operation later could succeed
    ///
    /// Nothing is retried automatically; this only tells the application
    /// whether an explicit retry is worth attempting.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ClientError::AdapterFailure { .. } | ClientError::AccountLimitReached { .. } => true,

            ClientError::Configuration { .. }
            | ClientError::AlreadyConfigured
            | ClientError::InvalidArgument { .. }
            | ClientError::AccountGone
            | ClientError::RuntimeStopped => false,

            _ => false,
        }
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            ClientError::Configuration { .. }
            | ClientError::AlreadyConfigured
            | ClientError::NotConfigured => "configuration",

            ClientError::InvalidAccountState { .. }
            | ClientError::AccountGone
            | ClientError::AccountLimitReached { .. } => "account",

            ClientError::InvalidCallState { .. } => "call",

            ClientError::InvalidArgument { .. } => "argument",

            ClientError::AdapterFailure { .. } => "engine",

            ClientError::RuntimeStopped => "system",
        }
    }
}
