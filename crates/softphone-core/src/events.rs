//! Notifications delivered to application code
//!
//! Every status transition and incoming call is reported twice, in the same
//! order, on the serialized context:
//!
//! - to the optional delegate registered on the Account or Call
//!   ([`AccountDelegate`], [`CallDelegate`]), and
//! - to every receiver returned by
//!   [`SessionRuntime::subscribe`](crate::SessionRuntime::subscribe) as a
//!   [`SessionEvent`].
//!
//! Delegate methods run on the path that also processes engine events, so
//! they must return promptly. To act on a call from inside a callback, spawn
//! a task:
//!
//! ```rust,no_run
//! use rvoip_softphone_core::{Account, AccountDelegate, Call};
//!
//! struct AutoAnswer;
//!
//! impl AccountDelegate for AutoAnswer {
//!     fn on_incoming_call(&self, _account: &Account, call: Call) {
//!         tokio::spawn(async move {
//!             if let Err(e) = call.begin().await {
//!                 eprintln!("answer failed: {e}");
//!             }
//!         });
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountKey, AccountStatus};
use crate::call::{Call, CallKey, CallStatus, GainChannel};
use crate::engine::{AccountId, CallId};
use crate::error::ClientError;

/// Account status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountStatusInfo {
    pub account: AccountKey,
    pub account_id: Option<AccountId>,
    pub previous: AccountStatus,
    pub status: AccountStatus,
    /// Registrar or engine reason for failure-driven transitions
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Call status transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStatusInfo {
    pub call: CallKey,
    pub call_id: Option<CallId>,
    pub previous: CallStatus,
    pub status: CallStatus,
    /// Why the call disconnected, when known
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Events broadcast to [`SessionRuntime::subscribe`](crate::SessionRuntime::subscribe) receivers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    AccountStatusChanged(AccountStatusInfo),
    /// A new incoming call was created for a connected account
    IncomingCall { account: Account, call: Call },
    CallStatusChanged(CallStatusInfo),
    /// The engine confirmed a gain change
    VolumeChanged {
        call: CallKey,
        channel: GainChannel,
        value: f32,
    },
    /// The engine confirmed a hold or resume
    HoldChanged { call: CallKey, on_hold: bool },
    /// The engine sent DTMF digits
    DigitsSent { call: CallKey, digits: String },
    /// The engine reported a failure that did not end in a terminal status
    AdapterFailure {
        account: Option<AccountKey>,
        call: Option<CallKey>,
        error: ClientError,
    },
}

impl SessionEvent {
    /// Short name of the event for logging
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::AccountStatusChanged(_) => "account_status_changed",
            SessionEvent::IncomingCall { .. } => "incoming_call",
            SessionEvent::CallStatusChanged(_) => "call_status_changed",
            SessionEvent::VolumeChanged { .. } => "volume_changed",
            SessionEvent::HoldChanged { .. } => "hold_changed",
            SessionEvent::DigitsSent { .. } => "digits_sent",
            SessionEvent::AdapterFailure { .. } => "adapter_failure",
        }
    }
}

/// Observer of one [`Account`]
///
/// All methods are optional. An account holds its delegate weakly.
pub trait AccountDelegate: Send + Sync {
    /// Called once per registration status transition
    fn on_account_status_changed(&self, _account: &Account, _info: &AccountStatusInfo) {}

    /// Called when the network offers a call to this account
    ///
    /// The call is in `Ready`; the application should `begin` (answer) or
    /// `end` (reject) it.
    fn on_incoming_call(&self, _account: &Account, _call: Call) {}
}

/// Observer of one [`Call`]
///
/// A call holds its delegate weakly.
pub trait CallDelegate: Send + Sync {
    /// Called once per call status transition
    fn on_call_status_changed(&self, _call: &Call, _info: &CallStatusInfo) {}
}
