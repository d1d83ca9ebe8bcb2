//! Account and Call state machines
//!
//! [`SessionCore`] owns the registries of every live account and call and is
//! only ever driven from the serialized context. Each operation or engine
//! event either mutates state and queues notifications, or is rejected
//! without touching anything. Notifications are drained by the runtime after
//! every step and delivered in the order they were queued.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::account::config::AccountConfig;
use crate::account::{Account, AccountKey, AccountShared, AccountStatus, Completion};
use crate::call::direction::{CallDirection, IncomingCall};
use crate::call::resources::{CallResource, ResourceKind};
use crate::call::{Call, CallKey, CallShared, CallStatus, GainChannel};
use crate::engine::{AccountId, CallId, EngineCommand, EngineEvent, IncomingInvite, SipEngine};
use crate::error::{ClientError, ClientResult};
use crate::events::{AccountDelegate, AccountStatusInfo, CallDelegate, CallStatusInfo, SessionEvent};

use super::config::RuntimeConfig;
use super::{AccountOp, CallOp, Envelope};

/// Reason attached to incoming calls ended by the decision timer
pub(crate) const INCOMING_TIMEOUT_REASON: &str = "incoming call timed out";

/// Reason attached to outgoing calls the engine could not give an id
pub(crate) const INVALID_CALL_ID_REASON: &str = "engine assigned an invalid call id";

/// Reason attached to calls pruned when their account is closed
pub(crate) const ACCOUNT_CLOSED_REASON: &str = "account closed";

/// Reason attached to calls ended by runtime shutdown
pub(crate) const SHUTDOWN_REASON: &str = "session runtime shut down";

/// Something the application must be told about
pub(crate) enum Notification {
    AccountStatus {
        account: Account,
        delegate: Option<Weak<dyn AccountDelegate>>,
        info: AccountStatusInfo,
    },
    IncomingCall {
        account: Account,
        delegate: Option<Weak<dyn AccountDelegate>>,
        call: Call,
    },
    CallStatus {
        call: Call,
        delegate: Option<Weak<dyn CallDelegate>>,
        info: CallStatusInfo,
    },
    Completion {
        completion: Completion,
        success: bool,
    },
    Event(SessionEvent),
}

struct AccountEntry {
    shared: Arc<AccountShared>,
    delegate: Option<Weak<dyn AccountDelegate>>,
    /// `connect` completions waiting for the registrar's verdict
    completions: Vec<Completion>,
}

struct CallEntry {
    shared: Arc<CallShared>,
    delegate: Option<Weak<dyn CallDelegate>>,
    ringback: Option<CallResource>,
    audio_session: Option<CallResource>,
}

impl CallEntry {
    fn new(shared: Arc<CallShared>) -> Self {
        Self {
            shared,
            delegate: None,
            ringback: None,
            audio_session: None,
        }
    }

    /// Whether the engine knows about this call
    fn in_flight(&self) -> bool {
        self.shared.call_id().is_some() || self.shared.current_status().is_active()
    }

    /// Acquire or release the call's resources for a newly entered status
    fn apply_resources(
        &mut self,
        next: CallStatus,
        ringback_enabled: bool,
        auto_audio_session: bool,
        engine: &Arc<dyn SipEngine>,
    ) {
        let key = self.shared.key;

        if next == CallStatus::Calling && ringback_enabled && self.ringback.is_none() {
            match CallResource::acquire(ResourceKind::Ringback, key, engine.clone()) {
                Ok(guard) => self.ringback = Some(guard),
                Err(e) => warn!("Failed to start ringback for call {}: {}", key, e),
            }
        }
        if !next.allows_ringback() {
            self.ringback = None;
        }

        if next == CallStatus::Connected && auto_audio_session && self.audio_session.is_none() {
            match CallResource::acquire(ResourceKind::AudioSession, key, engine.clone()) {
                Ok(guard) => self.audio_session = Some(guard),
                Err(e) => warn!("Failed to open audio session for call {}: {}", key, e),
            }
        }
        if next.is_terminal() {
            self.audio_session = None;
        }

        let mut media = self.shared.media.write();
        media.ringback_active = self.ringback.is_some();
        media.audio_session_open = self.audio_session.is_some();
    }
}

/// Engine refusals always surface as adapter failures
fn as_adapter_failure(error: ClientError) -> ClientError {
    match error {
        ClientError::AdapterFailure { .. } => error,
        other => ClientError::adapter_failure(other.to_string()),
    }
}

fn gain_field(channel: GainChannel) -> &'static str {
    match channel {
        GainChannel::Speaker => "volume",
        GainChannel::Microphone => "mic_volume",
    }
}

pub(crate) struct SessionCore {
    engine: Arc<dyn SipEngine>,
    config: RuntimeConfig,
    tx: mpsc::UnboundedSender<Envelope>,
    accounts: HashMap<AccountKey, AccountEntry>,
    account_ids: HashMap<AccountId, AccountKey>,
    calls: HashMap<CallKey, CallEntry>,
    call_ids: HashMap<CallId, CallKey>,
    outbox: Vec<Notification>,
}

impl SessionCore {
    pub(crate) fn new(
        engine: Arc<dyn SipEngine>,
        config: RuntimeConfig,
        tx: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            engine,
            config,
            tx,
            accounts: HashMap::new(),
            account_ids: HashMap::new(),
            calls: HashMap::new(),
            call_ids: HashMap::new(),
            outbox: Vec::new(),
        }
    }

    /// Drain queued notifications in the order they were produced
    pub(crate) fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    #[cfg(test)]
    pub(crate) fn account_count(&self) -> usize {
        self.accounts.len()
    }

    #[cfg(test)]
    pub(crate) fn call_count(&self) -> usize {
        self.calls.len()
    }

    fn submit(&self, command: EngineCommand) -> ClientResult<()> {
        let name = command.name();
        match self.engine.submit(command) {
            Ok(()) => {
                debug!("Submitted {} command", name);
                Ok(())
            }
            Err(e) => {
                warn!("Engine refused {} command: {}", name, e);
                Err(as_adapter_failure(e))
            }
        }
    }

    fn account_handle(&self, shared: &Arc<AccountShared>) -> Account {
        Account::from_parts(shared.clone(), self.tx.clone())
    }

    fn account(&self, key: AccountKey) -> ClientResult<&AccountEntry> {
        self.accounts.get(&key).ok_or(ClientError::AccountGone)
    }

    fn call(&self, key: CallKey) -> ClientResult<&CallEntry> {
        // Disconnected calls are pruned, so an unknown key is a finished call
        self.calls.get(&key).ok_or(ClientError::InvalidCallState {
            call: key,
            current: CallStatus::Disconnected,
        })
    }

    // ===== Registries =====

    pub(crate) fn add_account(&mut self, shared: Arc<AccountShared>) {
        debug!("Created account {}", shared.key);
        self.accounts.insert(
            shared.key,
            AccountEntry {
                shared,
                delegate: None,
                completions: Vec::new(),
            },
        );
    }

    pub(crate) fn add_call(&mut self, shared: Arc<CallShared>) {
        debug!("Created outgoing call {} on account {}", shared.key, shared.account);
        self.calls.insert(shared.key, CallEntry::new(shared));
    }

    pub(crate) fn set_account_delegate(
        &mut self,
        key: AccountKey,
        delegate: Option<Weak<dyn AccountDelegate>>,
    ) {
        match self.accounts.get_mut(&key) {
            Some(entry) => entry.delegate = delegate,
            None => debug!("Ignoring delegate for closed account {}", key),
        }
    }

    pub(crate) fn set_call_delegate(&mut self, key: CallKey, delegate: Option<Weak<dyn CallDelegate>>) {
        match self.calls.get_mut(&key) {
            Some(entry) => entry.delegate = delegate,
            None => debug!("Ignoring delegate for finished call {}", key),
        }
    }

    // ===== Account operations =====

    pub(crate) fn account_op(&mut self, key: AccountKey, op: AccountOp) -> ClientResult<()> {
        match op {
            AccountOp::Configure(config) => self.configure(key, config),
            AccountOp::Connect(completion) => self.connect(key, completion),
            AccountOp::Disconnect => self.disconnect(key),
            AccountOp::Close => self.close(key),
        }
    }

    fn configure(&mut self, key: AccountKey, config: AccountConfig) -> ClientResult<()> {
        let shared = self.account(key)?.shared.clone();
        if shared.config.get().is_some() {
            return Err(ClientError::AlreadyConfigured);
        }
        config.validate()?;

        let account_id = self.engine.add_account(&config).map_err(as_adapter_failure)?;
        let _ = shared.account_id.set(account_id);
        let _ = shared.config.set(config);
        self.account_ids.insert(account_id, key);

        info!("Configured account {} as {}", key, account_id);
        Ok(())
    }

    fn connect(&mut self, key: AccountKey, completion: Completion) -> ClientResult<()> {
        let shared = self.account(key)?.shared.clone();
        let (Some(account_id), Some(config)) = (shared.account_id.get().copied(), shared.config.get())
        else {
            return Err(ClientError::NotConfigured);
        };

        match shared.current_status() {
            AccountStatus::Connected => {
                self.outbox.push(Notification::Completion {
                    completion,
                    success: true,
                });
                Ok(())
            }
            AccountStatus::Connecting => {
                debug!("Account {} already registering, queueing completion", key);
                if let Some(entry) = self.accounts.get_mut(&key) {
                    entry.completions.push(completion);
                }
                Ok(())
            }
            AccountStatus::Offline => {
                let limit = self.config.max_active_accounts;
                let active = self
                    .accounts
                    .values()
                    .filter(|entry| entry.shared.key != key && entry.shared.current_status().is_active())
                    .count();
                if active >= limit {
                    return Err(ClientError::AccountLimitReached { limit });
                }

                self.submit(EngineCommand::Register {
                    account_id,
                    config: config.clone(),
                })?;
                if let Some(entry) = self.accounts.get_mut(&key) {
                    entry.completions.push(completion);
                }
                info!("Registering account {} with {}", key, config.registrar_uri());
                self.transition_account(key, AccountStatus::Connecting, None);
                Ok(())
            }
            current => Err(ClientError::InvalidAccountState { current }),
        }
    }

    fn disconnect(&mut self, key: AccountKey) -> ClientResult<()> {
        let shared = self.account(key)?.shared.clone();
        match shared.current_status() {
            AccountStatus::Connecting | AccountStatus::Connected => {
                let account_id = shared.account_id.get().copied().ok_or(ClientError::NotConfigured)?;
                self.submit(EngineCommand::Unregister { account_id })?;
                info!("Unregistering account {}", key);
                self.transition_account(key, AccountStatus::Disconnecting, None);
                self.complete_pending(key, false);
                Ok(())
            }
            current => Err(ClientError::InvalidAccountState { current }),
        }
    }

    fn close(&mut self, key: AccountKey) -> ClientResult<()> {
        let shared = self.account(key)?.shared.clone();
        let current = shared.current_status();
        if !current.is_closable() {
            return Err(ClientError::InvalidAccountState { current });
        }
        if let Some(entry) = self
            .calls
            .values()
            .find(|entry| entry.shared.account == key && entry.in_flight())
        {
            return Err(ClientError::InvalidCallState {
                call: entry.shared.key,
                current: entry.shared.current_status(),
            });
        }

        if let Some(account_id) = shared.account_id.get().copied() {
            self.engine.remove_account(account_id).map_err(as_adapter_failure)?;
            self.account_ids.remove(&account_id);
        }

        // Anything left is an outgoing call that was never started
        let orphans: Vec<CallKey> = self
            .calls
            .values()
            .filter(|entry| entry.shared.account == key)
            .map(|entry| entry.shared.key)
            .collect();
        for call in orphans {
            debug!("Discarding unstarted call {} of closed account {}", call, key);
            self.transition_call(call, CallStatus::Disconnected, Some(ACCOUNT_CLOSED_REASON.to_string()));
        }
        self.accounts.remove(&key);
        shared.closed.store(true, Ordering::Release);

        info!("Closed account {}", key);
        Ok(())
    }

    fn transition_account(&mut self, key: AccountKey, next: AccountStatus, reason: Option<String>) -> bool {
        let Some(entry) = self.accounts.get(&key) else {
            return false;
        };
        let previous = entry.shared.current_status();
        if !previous.can_transition_to(next) {
            debug!("Ignoring account {} transition {} -> {}", key, previous, next);
            return false;
        }

        entry.shared.status.send_replace(next);
        debug!("Account {} status {} -> {}", key, previous, next);

        let notification = Notification::AccountStatus {
            account: self.account_handle(&entry.shared),
            delegate: entry.delegate.clone(),
            info: AccountStatusInfo {
                account: key,
                account_id: entry.shared.account_id.get().copied(),
                previous,
                status: next,
                reason,
                timestamp: Utc::now(),
            },
        };
        self.outbox.push(notification);
        true
    }

    fn complete_pending(&mut self, key: AccountKey, success: bool) {
        let pending = self
            .accounts
            .get_mut(&key)
            .map(|entry| std::mem::take(&mut entry.completions))
            .unwrap_or_default();
        self.outbox.extend(
            pending
                .into_iter()
                .map(|completion| Notification::Completion { completion, success }),
        );
    }

    // ===== Call operations =====

    pub(crate) fn call_op(&mut self, key: CallKey, op: CallOp) -> ClientResult<()> {
        match op {
            CallOp::Begin => self.begin(key),
            CallOp::End => self.end_call(key, None),
            CallOp::SetGain(channel, value) => self.set_gain(key, channel, value),
            CallOp::SetMicrophoneMuted(muted) => self.set_microphone_muted(key, muted),
            CallOp::SendDigits(digits) => self.send_digits(key, digits),
            CallOp::SetHold(on_hold) => self.set_hold(key, on_hold),
            CallOp::RouteAudio(speaker) => self.route_audio(key, speaker),
            CallOp::OpenAudioSession => self.open_audio_session(key),
            CallOp::CloseAudioSession => self.close_audio_session(key),
        }
    }

    fn begin(&mut self, key: CallKey) -> ClientResult<()> {
        let shared = self.call(key)?.shared.clone();
        let current = shared.current_status();
        if current != CallStatus::Ready {
            return Err(ClientError::InvalidCallState { call: key, current });
        }

        let account = self.accounts.get(&shared.account).ok_or(ClientError::AccountGone)?;
        let account_id = account
            .shared
            .account_id
            .get()
            .copied()
            .ok_or(ClientError::NotConfigured)?;

        match &shared.direction {
            CallDirection::Outgoing(request) => {
                self.submit(EngineCommand::InitiateCall {
                    call: key,
                    account_id,
                    remote_uri: request.remote_uri.trim().to_string(),
                    identity: request.identity.clone(),
                })?;
                info!("Dialing {} from {} (call {})", request.remote_uri.trim(), account_id, key);
                self.transition_call(key, CallStatus::Calling, None);
            }
            CallDirection::Incoming(_) => {
                let call_id = shared
                    .call_id()
                    .ok_or(ClientError::InvalidCallState { call: key, current })?;
                self.submit(EngineCommand::AnswerCall { call_id })?;
                info!("Answering incoming call {}", call_id);
                self.transition_call(key, CallStatus::Connecting, None);
            }
        }
        Ok(())
    }

    fn end_call(&mut self, key: CallKey, reason: Option<String>) -> ClientResult<()> {
        let shared = self.call(key)?.shared.clone();
        if let Some(call_id) = shared.call_id() {
            // Local hangup completes whatever the engine answers
            let _ = self.submit(EngineCommand::TerminateCall { call_id });
        }
        info!("Ending call {} ({})", key, shared.current_status());
        self.transition_call(key, CallStatus::Disconnected, reason);
        Ok(())
    }

    /// Engine id of a call that is not finished
    fn live_call_id(&self, key: CallKey) -> ClientResult<CallId> {
        let entry = self.call(key)?;
        entry.shared.call_id().ok_or(ClientError::InvalidCallState {
            call: key,
            current: entry.shared.current_status(),
        })
    }

    /// Engine id of a call whose media is flowing
    fn connected_call_id(&self, key: CallKey) -> ClientResult<CallId> {
        let entry = self.call(key)?;
        let current = entry.shared.current_status();
        match (current, entry.shared.call_id()) {
            (CallStatus::Connected, Some(call_id)) => Ok(call_id),
            _ => Err(ClientError::InvalidCallState { call: key, current }),
        }
    }

    fn set_gain(&mut self, key: CallKey, channel: GainChannel, value: f32) -> ClientResult<()> {
        if value.is_nan() || value < 0.0 {
            return Err(ClientError::invalid_argument(
                gain_field(channel),
                format!("{} is outside 0.0..=1.0", value),
            ));
        }
        let value = value.min(1.0);
        let call_id = self.live_call_id(key)?;
        self.submit(EngineCommand::SetGain {
            call_id,
            channel,
            value,
        })
    }

    fn set_microphone_muted(&mut self, key: CallKey, muted: bool) -> ClientResult<()> {
        let call_id = self.connected_call_id(key)?;
        let shared = self.call(key)?.shared.clone();
        if shared.media.read().microphone_muted == muted {
            return Ok(());
        }
        self.submit(EngineCommand::SetMute { call_id, muted })?;
        shared.media.write().microphone_muted = muted;
        debug!("Call {} microphone muted: {}", key, muted);
        Ok(())
    }

    fn send_digits(&mut self, key: CallKey, digits: String) -> ClientResult<()> {
        let call_id = self.connected_call_id(key)?;
        self.submit(EngineCommand::SendDigits { call_id, digits })
    }

    fn set_hold(&mut self, key: CallKey, on_hold: bool) -> ClientResult<()> {
        let call_id = self.connected_call_id(key)?;
        self.submit(EngineCommand::SetHold { call_id, on_hold })
    }

    fn route_audio(&mut self, key: CallKey, speaker: bool) -> ClientResult<()> {
        let shared = self.call(key)?.shared.clone();
        let current = shared.current_status();
        let call_id = match shared.call_id() {
            Some(call_id) if current.is_active() => call_id,
            _ => return Err(ClientError::InvalidCallState { call: key, current }),
        };
        self.submit(EngineCommand::RouteAudio { call_id, speaker })?;
        shared.media.write().speaker = speaker;
        Ok(())
    }

    fn open_audio_session(&mut self, key: CallKey) -> ClientResult<()> {
        self.call(key)?;
        let engine = self.engine.clone();
        let Some(entry) = self.calls.get_mut(&key) else {
            return Ok(());
        };
        if entry.audio_session.is_some() {
            return Ok(());
        }
        let guard = CallResource::acquire(ResourceKind::AudioSession, key, engine).map_err(as_adapter_failure)?;
        entry.audio_session = Some(guard);
        entry.shared.media.write().audio_session_open = true;
        Ok(())
    }

    fn close_audio_session(&mut self, key: CallKey) -> ClientResult<()> {
        self.call(key)?;
        if let Some(entry) = self.calls.get_mut(&key) {
            if entry.audio_session.take().is_some() {
                entry.shared.media.write().audio_session_open = false;
            }
        }
        Ok(())
    }

    fn ringback_enabled(&self, key: CallKey) -> bool {
        let Some(entry) = self.calls.get(&key) else {
            return false;
        };
        entry.shared.direction.is_outgoing()
            && self
                .accounts
                .get(&entry.shared.account)
                .and_then(|account| account.shared.config.get())
                .is_some_and(|config| config.enable_ringback)
    }

    fn transition_call(&mut self, key: CallKey, next: CallStatus, reason: Option<String>) -> bool {
        let engine = self.engine.clone();
        let ringback_enabled = self.ringback_enabled(key);
        let auto_audio_session = self.config.auto_audio_session;

        let Some(entry) = self.calls.get_mut(&key) else {
            return false;
        };
        let previous = entry.shared.current_status();
        if !previous.can_advance_to(next) {
            debug!("Ignoring call {} transition {} -> {}", key, previous, next);
            return false;
        }

        entry.shared.status.send_replace(next);
        debug!("Call {} status {} -> {}", key, previous, next);
        entry.apply_resources(next, ringback_enabled, auto_audio_session, &engine);

        let notification = Notification::CallStatus {
            call: Call::from_parts(entry.shared.clone(), self.tx.clone()),
            delegate: entry.delegate.clone(),
            info: CallStatusInfo {
                call: key,
                call_id: entry.shared.call_id(),
                previous,
                status: next,
                reason,
                timestamp: Utc::now(),
            },
        };
        self.outbox.push(notification);

        if next.is_terminal() {
            self.remove_call(key);
        }
        true
    }

    fn remove_call(&mut self, key: CallKey) {
        if let Some(entry) = self.calls.remove(&key) {
            if let Some(call_id) = entry.shared.call_id() {
                self.call_ids.remove(&call_id);
            }
            debug!("Released call {}", key);
        }
    }

    // ===== Engine events =====

    pub(crate) fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::RegistrationSucceeded { account_id } => self.on_registration_succeeded(account_id),
            EngineEvent::RegistrationFailed { account_id, reason } => {
                self.on_registration_failed(account_id, reason)
            }
            EngineEvent::UnregistrationSucceeded { account_id } => {
                self.on_unregistration(account_id, None)
            }
            EngineEvent::UnregistrationFailed { account_id, reason } => {
                self.on_unregistration(account_id, Some(reason))
            }
            EngineEvent::IncomingInvite(invite) => self.on_incoming_invite(invite),
            EngineEvent::CallInitiated { call, call_id } => self.on_call_initiated(call, call_id),
            EngineEvent::CallInitiationFailed { call, reason } => {
                warn!("Engine could not start call {}: {}", call, reason);
                self.transition_call(call, CallStatus::Disconnected, Some(reason));
            }
            EngineEvent::CallRinging { call_id } => self.on_call_ringing(call_id),
            EngineEvent::CallAnswered { call_id } => {
                self.advance_call(call_id, CallStatus::Connecting, None)
            }
            EngineEvent::MediaConnected { call_id } => {
                self.advance_call(call_id, CallStatus::Connected, None)
            }
            EngineEvent::CallFailed { call_id, reason } => {
                warn!("Call {} failed: {}", call_id, reason);
                self.advance_call(call_id, CallStatus::Disconnected, Some(reason))
            }
            EngineEvent::CallDisconnected { call_id, reason } => {
                self.advance_call(call_id, CallStatus::Disconnected, reason)
            }
            EngineEvent::GainApplied {
                call_id,
                channel,
                value,
            } => self.on_gain_applied(call_id, channel, value),
            EngineEvent::DigitsSent { call_id, digits } => {
                if let Some(key) = self.call_key(call_id, "digits sent") {
                    self.outbox.push(Notification::Event(SessionEvent::DigitsSent { call: key, digits }));
                }
            }
            EngineEvent::DigitsRejected { call_id, reason } => self.on_digits_rejected(call_id, reason),
            EngineEvent::HoldApplied { call_id, on_hold } => self.on_hold_applied(call_id, on_hold),
        }
    }

    fn account_key(&self, account_id: AccountId, what: &str) -> Option<AccountKey> {
        let key = self.account_ids.get(&account_id).copied();
        if key.is_none() {
            debug!("Ignoring {} for unknown account {}", what, account_id);
        }
        key
    }

    fn call_key(&self, call_id: CallId, what: &str) -> Option<CallKey> {
        let key = self.call_ids.get(&call_id).copied();
        if key.is_none() {
            debug!("Ignoring {} for unknown call {}", what, call_id);
        }
        key
    }

    fn account_status(&self, key: AccountKey) -> Option<AccountStatus> {
        self.accounts.get(&key).map(|entry| entry.shared.current_status())
    }

    fn on_registration_succeeded(&mut self, account_id: AccountId) {
        let Some(key) = self.account_key(account_id, "registration success") else {
            return;
        };
        if self.transition_account(key, AccountStatus::Connected, None) {
            info!("Account {} registered", account_id);
            self.complete_pending(key, true);
        }
    }

    fn on_registration_failed(&mut self, account_id: AccountId, reason: String) {
        let Some(key) = self.account_key(account_id, "registration failure") else {
            return;
        };
        match self.account_status(key) {
            Some(AccountStatus::Connecting) => {
                warn!("Registration of {} rejected: {}", account_id, reason);
                self.transition_account(key, AccountStatus::Invalid, Some(reason));
                self.complete_pending(key, false);
            }
            Some(AccountStatus::Connected) => {
                warn!("Registration refresh of {} failed: {}", account_id, reason);
                self.outbox.push(Notification::Event(SessionEvent::AdapterFailure {
                    account: Some(key),
                    call: None,
                    error: ClientError::adapter_failure(reason),
                }));
            }
            status => debug!("Ignoring registration failure for {} while {:?}", account_id, status),
        }
    }

    fn on_unregistration(&mut self, account_id: AccountId, failure: Option<String>) {
        let Some(key) = self.account_key(account_id, "unregistration") else {
            return;
        };
        if !self.transition_account(key, AccountStatus::Offline, failure.clone()) {
            return;
        }
        match failure {
            Some(reason) => {
                warn!("Unregistration of {} failed: {}", account_id, reason);
                self.outbox.push(Notification::Event(SessionEvent::AdapterFailure {
                    account: Some(key),
                    call: None,
                    error: ClientError::adapter_failure(reason),
                }));
            }
            None => info!("Account {} unregistered", account_id),
        }
    }

    fn on_incoming_invite(&mut self, invite: IncomingInvite) {
        let IncomingInvite {
            call_id,
            from_uri,
            to_account_id,
            raw_message,
        } = invite;

        if !call_id.is_valid() {
            warn!("Dropping incoming call from {} with invalid id {}", from_uri, call_id);
            return;
        }

        let account = self
            .account_ids
            .get(&to_account_id)
            .and_then(|key| self.accounts.get(key))
            .filter(|entry| entry.shared.current_status() == AccountStatus::Connected);
        let Some(account) = account else {
            warn!(
                "Rejecting incoming call {} from {}: account {} is not connected",
                call_id, from_uri, to_account_id
            );
            let _ = self.submit(EngineCommand::TerminateCall { call_id });
            return;
        };
        if self.call_ids.contains_key(&call_id) {
            warn!("Ignoring repeated INVITE for existing call {}", call_id);
            return;
        }

        let account_handle = self.account_handle(&account.shared);
        let delegate = account.delegate.clone();
        let shared = Arc::new(CallShared::new(
            account.shared.key,
            CallDirection::Incoming(IncomingCall {
                from_uri: from_uri.clone(),
                raw_message,
            }),
        ));
        let _ = shared.call_id.set(call_id);
        let key = shared.key;

        self.calls.insert(key, CallEntry::new(shared.clone()));
        self.call_ids.insert(call_id, key);
        info!("Incoming call {} from {} for {}", call_id, from_uri, to_account_id);

        self.outbox.push(Notification::IncomingCall {
            account: account_handle,
            delegate,
            call: Call::from_parts(shared, self.tx.clone()),
        });

        if let Some(timeout) = self.config.incoming_call_timeout {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = tx.send(Envelope::IncomingTimeout(key));
            });
        }
    }

    pub(crate) fn on_incoming_timeout(&mut self, key: CallKey) {
        let still_ringing = self
            .calls
            .get(&key)
            .is_some_and(|entry| entry.shared.current_status() == CallStatus::Ready);
        if still_ringing {
            info!("Incoming call {} was not answered in time", key);
            let _ = self.end_call(key, Some(INCOMING_TIMEOUT_REASON.to_string()));
        }
    }

    fn on_call_initiated(&mut self, key: CallKey, call_id: CallId) {
        if !call_id.is_valid() {
            warn!("Engine assigned invalid id {} to call {}", call_id, key);
            self.transition_call(key, CallStatus::Disconnected, Some(INVALID_CALL_ID_REASON.to_string()));
            return;
        }
        let Some(entry) = self.calls.get(&key) else {
            warn!("Terminating {} acknowledged after its call ended", call_id);
            let _ = self.submit(EngineCommand::TerminateCall { call_id });
            return;
        };
        if entry.shared.call_id.set(call_id).is_err() {
            debug!("Call {} already has an engine id, ignoring {}", key, call_id);
            return;
        }
        self.call_ids.insert(call_id, key);
        debug!("Call {} assigned {}", key, call_id);
    }

    fn on_call_ringing(&mut self, call_id: CallId) {
        let Some(key) = self.call_key(call_id, "ringing") else {
            return;
        };
        // Our own 180 on an incoming call must not take it out of Ready
        let outgoing = self
            .calls
            .get(&key)
            .is_some_and(|entry| entry.shared.direction.is_outgoing());
        if !outgoing {
            debug!("Ignoring ringing for incoming call {}", call_id);
            return;
        }
        self.transition_call(key, CallStatus::Calling, None);
    }

    fn advance_call(&mut self, call_id: CallId, next: CallStatus, reason: Option<String>) {
        if let Some(key) = self.call_key(call_id, "status change") {
            self.transition_call(key, next, reason);
        }
    }

    fn on_gain_applied(&mut self, call_id: CallId, channel: GainChannel, value: f32) {
        let Some(key) = self.call_key(call_id, "gain acknowledgement") else {
            return;
        };
        if let Some(entry) = self.calls.get(&key) {
            let mut media = entry.shared.media.write();
            match channel {
                GainChannel::Speaker => media.volume = value,
                GainChannel::Microphone => media.mic_volume = value,
            }
        }
        self.outbox.push(Notification::Event(SessionEvent::VolumeChanged {
            call: key,
            channel,
            value,
        }));
    }

    fn on_digits_rejected(&mut self, call_id: CallId, reason: String) {
        let Some(key) = self.call_key(call_id, "digit rejection") else {
            return;
        };
        warn!("Engine rejected digits on {}: {}", call_id, reason);
        let account = self.calls.get(&key).map(|entry| entry.shared.account);
        self.outbox.push(Notification::Event(SessionEvent::AdapterFailure {
            account,
            call: Some(key),
            error: ClientError::adapter_failure(reason),
        }));
    }

    fn on_hold_applied(&mut self, call_id: CallId, on_hold: bool) {
        let Some(key) = self.call_key(call_id, "hold acknowledgement") else {
            return;
        };
        if let Some(entry) = self.calls.get(&key) {
            entry.shared.media.write().on_hold = on_hold;
        }
        self.outbox.push(Notification::Event(SessionEvent::HoldChanged { call: key, on_hold }));
    }

    /// End every call and resolve every pending completion
    pub(crate) fn shutdown(&mut self) {
        let calls: Vec<CallKey> = self.calls.keys().copied().collect();
        for key in calls {
            let _ = self.end_call(key, Some(SHUTDOWN_REASON.to_string()));
        }
        let accounts: Vec<AccountKey> = self.accounts.keys().copied().collect();
        for key in accounts {
            self.complete_pending(key, false);
        }
        info!("Session core stopped with {} account(s)", self.accounts.len());
    }
}
