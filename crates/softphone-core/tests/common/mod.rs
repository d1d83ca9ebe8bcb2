//! Shared fixtures for the softphone-core integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use rvoip_softphone_core::{
    Account, AccountConfig, AccountDelegate, AccountId, AccountStatus, AccountStatusInfo, Call,
    CallDelegate, CallId, CallStatus, CallStatusInfo, ClientError, ClientResult, EngineCommand,
    EngineEvent, EngineEventSender, IncomingInvite, LoggingConfig, RuntimeConfig, SessionEvent,
    SessionRuntime, SipEngine, setup_logging,
};

pub const INVITE: &str = "INVITE sip:alice@example.com SIP/2.0\r\n\
                          Via: SIP/2.0/UDP 10.0.0.2:5060;branch=z9hG4bK-524287-1\r\n\
                          Max-Forwards: 70\r\n\
                          From: \"Bob\" <sip:bob@example.com>;tag=4321\r\n\
                          To: <sip:alice@example.com>\r\n\
                          Call-ID: 3848276298220188511@10.0.0.2\r\n\
                          CSeq: 1 INVITE\r\n\
                          X-App-Call-Type: internal\r\n\
                          Content-Length: 0\r\n\r\n";

pub fn init_tracing() {
    // Only the first test in a binary installs the subscriber
    let _ = setup_logging(&LoggingConfig::for_tests());
}

/// Engine double that records every command it is handed
#[derive(Default)]
pub struct RecordingEngine {
    commands: Mutex<Vec<EngineCommand>>,
    removed: Mutex<Vec<AccountId>>,
    refused: Mutex<Vec<&'static str>>,
    next_account_id: AtomicI32,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_account_id: AtomicI32::new(1),
            ..Default::default()
        })
    }

    pub fn commands(&self) -> Vec<EngineCommand> {
        self.commands.lock().clone()
    }

    /// Names of the recorded commands, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.commands.lock().iter().map(|command| command.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|command| command.name() == name)
            .count()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }

    pub fn removed_accounts(&self) -> Vec<AccountId> {
        self.removed.lock().clone()
    }

    /// Refuse every future command with this name
    pub fn refuse(&self, name: &'static str) {
        self.refused.lock().push(name);
    }
}

impl SipEngine for RecordingEngine {
    fn add_account(&self, _config: &AccountConfig) -> ClientResult<AccountId> {
        Ok(AccountId(self.next_account_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn remove_account(&self, account_id: AccountId) -> ClientResult<()> {
        self.removed.lock().push(account_id);
        Ok(())
    }

    fn submit(&self, command: EngineCommand) -> ClientResult<()> {
        if self.refused.lock().contains(&command.name()) {
            return Err(ClientError::adapter_failure(format!("{} refused", command.name())));
        }
        self.commands.lock().push(command);
        Ok(())
    }
}

/// Delegate that records everything it is told
#[derive(Default)]
pub struct RecordingDelegate {
    pub account_statuses: Mutex<Vec<AccountStatusInfo>>,
    pub incoming: Mutex<Vec<Call>>,
    pub call_statuses: Mutex<Vec<CallStatusInfo>>,
}

impl RecordingDelegate {
    pub fn account_history(&self) -> Vec<AccountStatus> {
        self.account_statuses.lock().iter().map(|info| info.status).collect()
    }

    pub fn call_history(&self) -> Vec<CallStatus> {
        self.call_statuses.lock().iter().map(|info| info.status).collect()
    }
}

impl AccountDelegate for RecordingDelegate {
    fn on_account_status_changed(&self, _account: &Account, info: &AccountStatusInfo) {
        self.account_statuses.lock().push(info.clone());
    }

    fn on_incoming_call(&self, _account: &Account, call: Call) {
        self.incoming.lock().push(call);
    }
}

impl CallDelegate for RecordingDelegate {
    fn on_call_status_changed(&self, _call: &Call, info: &CallStatusInfo) {
        self.call_statuses.lock().push(info.clone());
    }
}

pub struct Harness {
    pub runtime: SessionRuntime,
    pub engine: Arc<RecordingEngine>,
    pub events: EngineEventSender,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        init_tracing();
        let engine = RecordingEngine::new();
        let runtime = SessionRuntime::start(engine.clone(), config).expect("runtime starts");
        let events = runtime.engine_events();
        Self {
            runtime,
            engine,
            events,
        }
    }

    /// Push an engine event and wait until it has been processed
    pub async fn emit(&self, event: EngineEvent) {
        self.events.send(event).expect("runtime accepts events");
        self.runtime.flush().await.expect("runtime flushes");
    }

    pub async fn configured_account(&self, user: &str) -> Account {
        let account = self.runtime.create_account().expect("account created");
        account.configure(account_config(user)).await.expect("configure succeeds");
        account
    }

    pub async fn connected_account(&self, user: &str) -> Account {
        let account = self.configured_account(user).await;
        let pending = account.connect().await.expect("connect accepted");
        let account_id = account.account_id().expect("configured account has an id");
        self.emit(EngineEvent::RegistrationSucceeded { account_id }).await;
        assert!(pending.outcome().await);
        account
    }

    /// Deliver an INVITE to `account` and return the call handed to subscribers
    pub async fn incoming_call(&self, account: &Account, call_id: CallId) -> Call {
        let mut rx = self.runtime.subscribe();
        self.emit(EngineEvent::IncomingInvite(IncomingInvite {
            call_id,
            from_uri: "sip:bob@example.com".to_string(),
            to_account_id: account.account_id().expect("account id"),
            raw_message: INVITE.to_string(),
        }))
        .await;
        loop {
            match next_event(&mut rx).await {
                SessionEvent::IncomingCall { call, .. } => return call,
                _ => continue,
            }
        }
    }

    /// Bring an incoming call to Connected
    pub async fn connected_call(&self, account: &Account, call_id: CallId) -> Call {
        let call = self.incoming_call(account, call_id).await;
        call.begin().await.expect("answer accepted");
        self.emit(EngineEvent::MediaConnected { call_id }).await;
        assert_eq!(call.status(), CallStatus::Connected);
        call
    }
}

pub fn account_config(user: &str) -> AccountConfig {
    AccountConfig::new(format!("sip:{user}@example.com"), "registrar.example.com")
        .with_credentials(user, "secret123")
}

pub async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event arrives in time")
        .expect("event channel open")
}

/// Everything currently buffered in a subscription
pub fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
