//! The serialized execution context
//!
//! [`SessionRuntime`] spawns a single tokio task that owns every Account and
//! Call. Application operations and engine events share one channel into
//! that task, so they are applied strictly in arrival order and never
//! concurrently. After each step the task delivers the resulting
//! notifications to delegates, completions and broadcast subscribers before
//! taking the next message.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_softphone_core::{RuntimeConfig, SessionRuntime, SipEngine};
//!
//! # async fn example(engine: Arc<dyn SipEngine>) -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = SessionRuntime::start(engine, RuntimeConfig::default())?;
//!
//! // Hand this to the native engine so it can report results
//! let events = runtime.engine_events();
//!
//! let account = runtime.create_account()?;
//! let mut notifications = runtime.subscribe();
//! # let _ = (events, account, notifications);
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub(crate) mod state;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info};

use crate::account::config::AccountConfig;
use crate::account::{Account, AccountKey, AccountShared, Completion};
use crate::call::{CallKey, CallShared, GainChannel};
use crate::engine::{EngineEvent, EngineEventSender, SipEngine};
use crate::error::{ClientError, ClientResult};
use crate::events::{AccountDelegate, CallDelegate, SessionEvent};

use self::config::RuntimeConfig;
use self::state::{Notification, SessionCore};

type Reply = oneshot::Sender<ClientResult<()>>;

/// Account operations executed on the serialized context
pub(crate) enum AccountOp {
    Configure(AccountConfig),
    Connect(Completion),
    Disconnect,
    Close,
}

/// Call operations executed on the serialized context
pub(crate) enum CallOp {
    Begin,
    End,
    SetGain(GainChannel, f32),
    SetMicrophoneMuted(bool),
    SendDigits(String),
    SetHold(bool),
    RouteAudio(bool),
    OpenAudioSession,
    CloseAudioSession,
}

/// Everything the serialized context processes
pub(crate) enum Envelope {
    Engine(EngineEvent),
    AddAccount(Arc<AccountShared>),
    AddCall(Arc<CallShared>),
    Account {
        key: AccountKey,
        op: AccountOp,
        reply: Reply,
    },
    Call {
        key: CallKey,
        op: CallOp,
        reply: Reply,
    },
    AccountDelegate {
        key: AccountKey,
        delegate: Option<Weak<dyn AccountDelegate>>,
    },
    CallDelegate {
        key: CallKey,
        delegate: Option<Weak<dyn CallDelegate>>,
    },
    IncomingTimeout(CallKey),
    Flush(oneshot::Sender<()>),
    Shutdown(Option<oneshot::Sender<()>>),
}

/// Owner of the serialized execution context
///
/// Dropping the runtime stops the context; outstanding handles then fail
/// with `ClientError::RuntimeStopped`.
pub struct SessionRuntime {
    tx: mpsc::UnboundedSender<Envelope>,
    events: broadcast::Sender<SessionEvent>,
    config: RuntimeConfig,
}

impl SessionRuntime {
    /// Start the serialized context on the current tokio runtime
    ///
    /// # Errors
    ///
    /// `ClientError::Configuration` if `config` is invalid or no tokio
    /// runtime is available.
    pub fn start(engine: Arc<dyn SipEngine>, config: RuntimeConfig) -> ClientResult<Self> {
        config.validate()?;
        let handle = Handle::try_current().map_err(|_| {
            ClientError::configuration("runtime", "SessionRuntime must be started inside a tokio runtime")
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity);
        let core = SessionCore::new(engine, config.clone(), tx.clone());
        handle.spawn(run(core, rx, events.clone()));

        info!(
            "Session runtime started (max active accounts: {}, incoming timeout: {:?})",
            config.max_active_accounts, config.incoming_call_timeout
        );
        Ok(Self { tx, events, config })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Sender the native engine uses to report results and pushes
    pub fn engine_events(&self) -> EngineEventSender {
        EngineEventSender::new(self.tx.clone())
    }

    /// Receive every notification produced from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Create a new, unconfigured account in the Offline status
    pub fn create_account(&self) -> ClientResult<Account> {
        let shared = Arc::new(AccountShared::new());
        self.tx
            .send(Envelope::AddAccount(shared.clone()))
            .map_err(|_| ClientError::RuntimeStopped)?;
        Ok(Account::from_parts(shared, self.tx.clone()))
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Wait until everything enqueued before this call has been processed
    /// and its notifications delivered
    pub async fn flush(&self) -> ClientResult<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Flush(done))
            .map_err(|_| ClientError::RuntimeStopped)?;
        rx.await.map_err(|_| ClientError::RuntimeStopped)
    }

    /// End every call, release its resources and stop the context
    pub async fn shutdown(&self) -> ClientResult<()> {
        let (done, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Shutdown(Some(done)))
            .map_err(|_| ClientError::RuntimeStopped)?;
        rx.await.map_err(|_| ClientError::RuntimeStopped)
    }
}

impl Drop for SessionRuntime {
    fn drop(&mut self) {
        let _ = self.tx.send(Envelope::Shutdown(None));
    }
}

impl std::fmt::Debug for SessionRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRuntime")
            .field("running", &self.is_running())
            .field("config", &self.config)
            .finish()
    }
}

async fn run(
    mut core: SessionCore,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    events: broadcast::Sender<SessionEvent>,
) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Engine(event) => core.handle_engine_event(event),
            Envelope::AddAccount(shared) => core.add_account(shared),
            Envelope::AddCall(shared) => core.add_call(shared),
            Envelope::Account { key, op, reply } => {
                let result = core.account_op(key, op);
                deliver(core.take_notifications(), &events);
                let _ = reply.send(result);
            }
            Envelope::Call { key, op, reply } => {
                let result = core.call_op(key, op);
                deliver(core.take_notifications(), &events);
                let _ = reply.send(result);
            }
            Envelope::AccountDelegate { key, delegate } => core.set_account_delegate(key, delegate),
            Envelope::CallDelegate { key, delegate } => core.set_call_delegate(key, delegate),
            Envelope::IncomingTimeout(key) => core.on_incoming_timeout(key),
            Envelope::Flush(done) => {
                let _ = done.send(());
            }
            Envelope::Shutdown(done) => {
                core.shutdown();
                deliver(core.take_notifications(), &events);
                if let Some(done) = done {
                    let _ = done.send(());
                }
                break;
            }
        }
        deliver(core.take_notifications(), &events);
    }
    info!("Session runtime stopped");
}

/// Run an application callback, containing any panic
fn guarded(what: &str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!("Application {} callback panicked", what);
    }
}

fn publish(events: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    let name = event.name();
    if events.send(event).is_err() {
        debug!("No subscribers for {} event", name);
    }
}

fn deliver(notifications: Vec<Notification>, events: &broadcast::Sender<SessionEvent>) {
    for notification in notifications {
        match notification {
            Notification::AccountStatus {
                account,
                delegate,
                info,
            } => {
                if let Some(delegate) = delegate.as_ref().and_then(Weak::upgrade) {
                    guarded("account status", || {
                        delegate.on_account_status_changed(&account, &info)
                    });
                }
                publish(events, SessionEvent::AccountStatusChanged(info));
            }
            Notification::IncomingCall {
                account,
                delegate,
                call,
            } => {
                if let Some(delegate) = delegate.as_ref().and_then(Weak::upgrade) {
                    let offered = call.clone();
                    guarded("incoming call", || delegate.on_incoming_call(&account, offered));
                }
                publish(events, SessionEvent::IncomingCall { account, call });
            }
            Notification::CallStatus {
                call,
                delegate,
                info,
            } => {
                if let Some(delegate) = delegate.as_ref().and_then(Weak::upgrade) {
                    guarded("call status", || delegate.on_call_status_changed(&call, &info));
                }
                publish(events, SessionEvent::CallStatusChanged(info));
            }
            Notification::Completion {
                completion,
                success,
            } => guarded("connect completion", || completion.complete(success)),
            Notification::Event(event) => publish(events, event),
        }
    }
}
