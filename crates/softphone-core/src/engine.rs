//! SIP engine adapter contract
//!
//! The softphone core never speaks SIP itself. It drives a native signaling
//! engine through a narrow command interface ([`SipEngine`]) and consumes the
//! engine's asynchronous results as [`EngineEvent`]s pushed through an
//! [`EngineEventSender`].
//!
//! ```text
//! ┌──────────────────────────┐   EngineCommand    ┌──────────────────────┐
//! │  SessionRuntime          │ ─────────────────► │  native SIP engine   │
//! │  (Account / Call state)  │ ◄───────────────── │  (transport, media)  │
//! └──────────────────────────┘    EngineEvent     └──────────────────────┘
//! ```
//!
//! Commands are fire-and-forget: `submit` only reports whether the engine
//! accepted the command. Every outcome arrives later as an event on the same
//! serialized context that processes application operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::account::config::AccountConfig;
use crate::call::direction::CallerIdentity;
use crate::call::{CallKey, GainChannel};
use crate::error::{ClientError, ClientResult};
use crate::runtime::Envelope;

/// Account identifier assigned by the SIP engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub i32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acc#{}", self.0)
    }
}

/// Call identifier assigned by the SIP engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(pub i32);

impl CallId {
    /// Whether the engine handed out a real id. Negative values are the
    /// engine's "no call" sentinel.
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// Commands issued to the native engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// Send REGISTER for the account
    Register {
        account_id: AccountId,
        config: AccountConfig,
    },
    /// Remove the registration (REGISTER with Expires: 0)
    Unregister { account_id: AccountId },
    /// Send an INVITE. `call` correlates the later [`EngineEvent::CallInitiated`].
    InitiateCall {
        call: CallKey,
        account_id: AccountId,
        remote_uri: String,
        identity: CallerIdentity,
    },
    /// Answer an incoming INVITE with 200 OK
    AnswerCall { call_id: CallId },
    /// Hang up, cancel or reject the call depending on its dialog state
    TerminateCall { call_id: CallId },
    /// Adjust speaker or microphone gain
    SetGain {
        call_id: CallId,
        channel: GainChannel,
        value: f32,
    },
    /// Mute or unmute the microphone
    SetMute { call_id: CallId, muted: bool },
    /// Send DTMF digits; validity of the digits is the engine's concern
    SendDigits { call_id: CallId, digits: String },
    /// Put the call on hold or take it off hold
    SetHold { call_id: CallId, on_hold: bool },
    /// Route call audio to the loudspeaker or back to the receiver
    RouteAudio { call_id: CallId, speaker: bool },
    /// Start the ringback tone player owned by the call
    StartRingback { call: CallKey },
    /// Stop and release the ringback tone player
    StopRingback { call: CallKey },
    /// Acquire the audio hardware route for the call
    OpenAudioSession { call: CallKey },
    /// Release the audio hardware route
    CloseAudioSession { call: CallKey },
}

impl EngineCommand {
    /// Short name of the command for logging
    pub fn name(&self) -> &'static str {
        match self {
            EngineCommand::Register { .. } => "register",
            EngineCommand::Unregister { .. } => "unregister",
            EngineCommand::InitiateCall { .. } => "initiate_call",
            EngineCommand::AnswerCall { .. } => "answer_call",
            EngineCommand::TerminateCall { .. } => "terminate_call",
            EngineCommand::SetGain { .. } => "set_gain",
            EngineCommand::SetMute { .. } => "set_mute",
            EngineCommand::SendDigits { .. } => "send_digits",
            EngineCommand::SetHold { .. } => "set_hold",
            EngineCommand::RouteAudio { .. } => "route_audio",
            EngineCommand::StartRingback { .. } => "start_ringback",
            EngineCommand::StopRingback { .. } => "stop_ringback",
            EngineCommand::OpenAudioSession { .. } => "open_audio_session",
            EngineCommand::CloseAudioSession { .. } => "close_audio_session",
        }
    }
}

/// An inbound INVITE delivered by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingInvite {
    /// Engine identifier of the new call
    pub call_id: CallId,
    /// URI of the calling party
    pub from_uri: String,
    /// Account the INVITE was addressed to
    pub to_account_id: AccountId,
    /// The initiating SIP message, kept for header inspection
    pub raw_message: String,
}

/// Asynchronous results and pushes from the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    RegistrationSucceeded {
        account_id: AccountId,
    },
    RegistrationFailed {
        account_id: AccountId,
        reason: String,
    },
    UnregistrationSucceeded {
        account_id: AccountId,
    },
    UnregistrationFailed {
        account_id: AccountId,
        reason: String,
    },
    IncomingInvite(IncomingInvite),
    /// The engine accepted an [`EngineCommand::InitiateCall`] and assigned an id
    CallInitiated {
        call: CallKey,
        call_id: CallId,
    },
    /// The engine could not start the outgoing call at all
    CallInitiationFailed {
        call: CallKey,
        reason: String,
    },
    /// 180/183 received for an outgoing call. Ignored for incoming calls.
    CallRinging {
        call_id: CallId,
    },
    /// The call was answered, media is being negotiated
    CallAnswered {
        call_id: CallId,
    },
    /// Media is flowing
    MediaConnected {
        call_id: CallId,
    },
    CallFailed {
        call_id: CallId,
        reason: String,
    },
    CallDisconnected {
        call_id: CallId,
        reason: Option<String>,
    },
    GainApplied {
        call_id: CallId,
        channel: GainChannel,
        value: f32,
    },
    DigitsSent {
        call_id: CallId,
        digits: String,
    },
    DigitsRejected {
        call_id: CallId,
        reason: String,
    },
    HoldApplied {
        call_id: CallId,
        on_hold: bool,
    },
}

/// The native SIP engine as seen by the softphone core
///
/// Implementations must not block: `add_account` and `remove_account` are
/// local bookkeeping in the engine, and `submit` only enqueues work.
#[cfg_attr(test, mockall::automock)]
pub trait SipEngine: Send + Sync {
    /// Register account configuration with the engine and obtain its id
    fn add_account(&self, config: &AccountConfig) -> ClientResult<AccountId>;

    /// Release an account previously added with [`SipEngine::add_account`]
    fn remove_account(&self, account_id: AccountId) -> ClientResult<()>;

    /// Enqueue a command. `Err` means the engine refused it outright.
    fn submit(&self, command: EngineCommand) -> ClientResult<()>;
}

/// Handle the engine uses to push events into the serialized context
///
/// Events are processed strictly in the order they are sent.
#[derive(Clone)]
pub struct EngineEventSender {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl EngineEventSender {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { tx }
    }

    /// Deliver an engine event
    pub fn send(&self, event: EngineEvent) -> ClientResult<()> {
        self.tx
            .send(Envelope::Engine(event))
            .map_err(|_| ClientError::RuntimeStopped)
    }
}

impl fmt::Debug for EngineEventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineEventSender")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}
