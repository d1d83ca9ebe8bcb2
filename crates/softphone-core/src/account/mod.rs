//! SIP account registration
//!
//! An [`Account`] owns one registration with a SIP registrar. It is created
//! unconfigured by [`SessionRuntime::create_account`](crate::SessionRuntime::create_account),
//! configured exactly once, and then connected and disconnected by the
//! application while the engine reports the outcome of each REGISTER.
//!
//! # Registration state machine
//!
//! ```text
//!            connect()              engine: registered
//!  Offline ─────────────► Connecting ───────────────────► Connected
//!     ▲                      │   │                            │
//!     │                      │   └── engine: rejected ──► Invalid (terminal)
//!     │                      │ disconnect()                   │ disconnect()
//!     │                      ▼                                ▼
//!     └──── engine: unregistered ◄────────── Disconnecting ◄──┘
//! ```
//!
//! Every transition is delivered to the account delegate and to
//! [`SessionRuntime::subscribe`](crate::SessionRuntime::subscribe) receivers
//! in the order the underlying engine events arrived.
//!
//! # Example
//!
//! ```rust,no_run
//! # use rvoip_softphone_core::{AccountConfig, SessionRuntime};
//! # async fn example(runtime: SessionRuntime) -> Result<(), Box<dyn std::error::Error>> {
//! let account = runtime.create_account()?;
//! account
//!     .configure(
//!         AccountConfig::new("sip:alice@example.com", "sip:registrar.example.com")
//!             .with_credentials("alice", "secret123"),
//!     )
//!     .await?;
//!
//! let pending = account.connect().await?;
//! if pending.outcome().await {
//!     println!("registered as {:?}", account.account_id());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::engine::AccountId;
use crate::error::{ClientError, ClientResult};
use crate::events::AccountDelegate;
use crate::runtime::{AccountOp, Envelope};

use self::config::AccountConfig;

/// Local identifier of an [`Account`], valid before the engine assigns an id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountKey(Uuid);

impl AccountKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration status of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountStatus {
    /// No registration has been done, or it was removed
    Offline,
    /// The registrar rejected the registration. Terminal for this instance.
    Invalid,
    /// REGISTER sent, waiting for the registrar
    Connecting,
    /// Registered with the SIP server
    Connected,
    /// Unregistration in progress
    Disconnecting,
}

impl AccountStatus {
    /// Whether `next` is a legal successor of this status
    pub fn can_transition_to(self, next: AccountStatus) -> bool {
        use AccountStatus::*;
        matches!(
            (self, next),
            (Offline, Connecting)
                | (Connecting, Connected)
                | (Connecting, Invalid)
                | (Connecting, Disconnecting)
                | (Connected, Disconnecting)
                | (Disconnecting, Offline)
        )
    }

    /// Whether the account holds (or is acquiring or releasing) a registration
    pub fn is_active(self) -> bool {
        matches!(
            self,
            AccountStatus::Connecting | AccountStatus::Connected | AccountStatus::Disconnecting
        )
    }

    /// Whether the account may be torn down in this status
    pub fn is_closable(self) -> bool {
        matches!(self, AccountStatus::Offline | AccountStatus::Invalid)
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Offline => write!(f, "Offline"),
            AccountStatus::Invalid => write!(f, "Invalid"),
            AccountStatus::Connecting => write!(f, "Connecting"),
            AccountStatus::Connected => write!(f, "Connected"),
            AccountStatus::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// State shared between account handles and the serialized context.
/// Only the serialized context writes it.
pub(crate) struct AccountShared {
    pub(crate) key: AccountKey,
    pub(crate) account_id: OnceLock<AccountId>,
    pub(crate) config: OnceLock<AccountConfig>,
    pub(crate) status: watch::Sender<AccountStatus>,
    pub(crate) closed: AtomicBool,
}

impl AccountShared {
    pub(crate) fn new() -> Self {
        let (status, _) = watch::channel(AccountStatus::Offline);
        Self {
            key: AccountKey::new(),
            account_id: OnceLock::new(),
            config: OnceLock::new(),
            status,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn current_status(&self) -> AccountStatus {
        *self.status.borrow()
    }
}

/// Completion of a `connect` request, invoked exactly once with the outcome
pub(crate) enum Completion {
    Channel(oneshot::Sender<bool>),
    Callback(Box<dyn FnOnce(bool) + Send>),
}

impl Completion {
    pub(crate) fn complete(self, success: bool) {
        match self {
            Completion::Channel(tx) => {
                let _ = tx.send(success);
            }
            Completion::Callback(callback) => callback(success),
        }
    }
}

/// Outcome of a registration started with [`Account::connect`]
#[derive(Debug)]
pub struct PendingRegistration {
    rx: oneshot::Receiver<bool>,
}

impl PendingRegistration {
    /// Wait for the registrar's verdict
    ///
    /// Resolves to `false` when the registration is rejected, abandoned by
    /// `disconnect`, or the runtime stops before an outcome is known.
    pub async fn outcome(self) -> bool {
        self.rx.await.unwrap_or(false)
    }
}

/// Handle to a SIP account owned by a [`SessionRuntime`](crate::SessionRuntime)
///
/// Handles are cheap to clone; all clones refer to the same registration.
#[derive(Clone)]
pub struct Account {
    shared: Arc<AccountShared>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Account {
    pub(crate) fn from_parts(shared: Arc<AccountShared>, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { shared, tx }
    }

    pub(crate) fn sender(&self) -> &mpsc::UnboundedSender<Envelope> {
        &self.tx
    }

    pub fn key(&self) -> AccountKey {
        self.shared.key
    }

    /// Engine-assigned id, available once configured
    pub fn account_id(&self) -> Option<AccountId> {
        self.shared.account_id.get().copied()
    }

    pub fn config(&self) -> Option<&AccountConfig> {
        self.shared.config.get()
    }

    pub fn status(&self) -> AccountStatus {
        self.shared.current_status()
    }

    /// Observe status changes
    pub fn watch_status(&self) -> watch::Receiver<AccountStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_configured(&self) -> bool {
        self.shared.config.get().is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == AccountStatus::Connected
    }

    /// Whether [`close`](Self::close) has torn the account down
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Configure the account. Succeeds at most once per account.
    ///
    /// # Errors
    ///
    /// * `ClientError::AlreadyConfigured` - a configuration was already accepted
    /// * `ClientError::Configuration` - a field is missing or malformed
    /// * `ClientError::AdapterFailure` - the engine refused the account
    pub async fn configure(&self, config: AccountConfig) -> ClientResult<()> {
        self.request(AccountOp::Configure(config)).await
    }

    /// Start registering with the registrar
    ///
    /// Returns as soon as the REGISTER has been handed to the engine. Calling
    /// it again while Connecting or Connected does not send a second REGISTER;
    /// the returned [`PendingRegistration`] still resolves with the outcome.
    ///
    /// # Errors
    ///
    /// * `ClientError::NotConfigured` - `configure` has not succeeded
    /// * `ClientError::InvalidAccountState` - the account is Invalid or Disconnecting
    /// * `ClientError::AccountLimitReached` - another account is already active
    pub async fn connect(&self) -> ClientResult<PendingRegistration> {
        let (tx, rx) = oneshot::channel();
        self.request(AccountOp::Connect(Completion::Channel(tx))).await?;
        Ok(PendingRegistration { rx })
    }

    /// Like [`connect`](Self::connect), but reports the outcome through a
    /// callback run on the serialized context. The callback is dropped
    /// without being called if this returns an error.
    pub async fn connect_with<F>(&self, completion: F) -> ClientResult<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.request(AccountOp::Connect(Completion::Callback(Box::new(completion))))
            .await
    }

    /// Unregister from the registrar
    ///
    /// Valid from Connecting or Connected. A registration still pending is
    /// abandoned and its completion resolves to `false`.
    pub async fn disconnect(&self) -> ClientResult<()> {
        self.request(AccountOp::Disconnect).await
    }

    /// Tear the account down
    ///
    /// Allowed only while Offline or Invalid and with no call in progress.
    /// Afterwards every operation on this account fails with `AccountGone`.
    pub async fn close(&self) -> ClientResult<()> {
        self.request(AccountOp::Close).await
    }

    /// Set the observer for this account. The account does not keep it alive.
    pub fn set_delegate<D: AccountDelegate + 'static>(&self, delegate: &Arc<D>) {
        let weak: Weak<dyn AccountDelegate> = Arc::downgrade(delegate) as Weak<dyn AccountDelegate>;
        let _ = self.tx.send(Envelope::AccountDelegate {
            key: self.shared.key,
            delegate: Some(weak),
        });
    }

    pub fn clear_delegate(&self) {
        let _ = self.tx.send(Envelope::AccountDelegate {
            key: self.shared.key,
            delegate: None,
        });
    }

    async fn request(&self, op: AccountOp) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Account {
                key: self.shared.key,
                op,
                reply,
            })
            .map_err(|_| ClientError::RuntimeStopped)?;
        rx.await.map_err(|_| ClientError::RuntimeStopped)?
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.shared.key == other.shared.key
    }
}

impl Eq for Account {}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("key", &self.shared.key)
            .field("account_id", &self.account_id())
            .field("status", &self.status())
            .finish()
    }
}
