//! Call sessions
//!
//! A [`Call`] is one voice session bound to an [`Account`](crate::Account),
//! either placed by the application ([`Call::outgoing`]) or offered by the
//! network and delivered through
//! [`AccountDelegate::on_incoming_call`](crate::AccountDelegate::on_incoming_call).
//!
//! # Call state machine
//!
//! ```text
//!  Ready ──► Calling ──► Connecting ──► Connected
//!    │          │            │              │
//!    └──────────┴────────────┴──────────────┴──► Disconnected
//! ```
//!
//! Status only moves forward. Any state may jump to Disconnected on local
//! hangup, remote hangup or failure; once Disconnected nothing changes and
//! every control operation is rejected.
//!
//! Control operations (`begin`, `end`, volume, mute, DTMF, hold) only express
//! intent to the engine. Their effect is confirmed by later engine events.

pub mod direction;
pub(crate) mod headers;
pub(crate) mod resources;

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::account::{Account, AccountKey};
use crate::engine::CallId;
use crate::error::{ClientError, ClientResult};
use crate::events::CallDelegate;
use crate::runtime::{CallOp, Envelope};

use self::direction::{CallDirection, OutgoingCall};

/// Local identifier of a [`Call`], valid before the engine assigns a call id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallKey(Uuid);

impl CallKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Call session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallStatus {
    /// Ready to be placed or picked up
    Ready,
    /// Ringing
    Calling,
    /// One side picked up, media is being negotiated
    Connecting,
    /// Media is flowing
    Connected,
    /// Hung up or failed
    Disconnected,
}

impl CallStatus {
    fn rank(self) -> u8 {
        match self {
            CallStatus::Ready => 0,
            CallStatus::Calling => 1,
            CallStatus::Connecting => 2,
            CallStatus::Connected => 3,
            CallStatus::Disconnected => 4,
        }
    }

    /// Whether moving to `next` is a forward step (or a jump to Disconnected)
    pub fn can_advance_to(self, next: CallStatus) -> bool {
        self != CallStatus::Disconnected && next.rank() > self.rank()
    }

    /// Calling, Connecting or Connected
    pub fn is_active(self) -> bool {
        matches!(
            self,
            CallStatus::Calling | CallStatus::Connecting | CallStatus::Connected
        )
    }

    pub fn is_terminal(self) -> bool {
        self == CallStatus::Disconnected
    }

    /// Statuses during which the ringback tone may play
    pub(crate) fn allows_ringback(self) -> bool {
        matches!(self, CallStatus::Calling | CallStatus::Connecting)
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Ready => write!(f, "Ready"),
            CallStatus::Calling => write!(f, "Calling"),
            CallStatus::Connecting => write!(f, "Connecting"),
            CallStatus::Connected => write!(f, "Connected"),
            CallStatus::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Gain control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GainChannel {
    /// Received audio played to the user
    Speaker,
    /// Audio captured from the microphone and transmitted
    Microphone,
}

/// Media flags of a call, written only by the serialized context
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MediaState {
    pub(crate) volume: f32,
    pub(crate) mic_volume: f32,
    pub(crate) microphone_muted: bool,
    pub(crate) on_hold: bool,
    pub(crate) speaker: bool,
    pub(crate) ringback_active: bool,
    pub(crate) audio_session_open: bool,
}

impl Default for MediaState {
    fn default() -> Self {
        Self {
            volume: 1.0,
            mic_volume: 1.0,
            microphone_muted: false,
            on_hold: false,
            speaker: false,
            ringback_active: false,
            audio_session_open: false,
        }
    }
}

pub(crate) struct CallShared {
    pub(crate) key: CallKey,
    pub(crate) account: AccountKey,
    pub(crate) direction: CallDirection,
    pub(crate) call_id: OnceLock<CallId>,
    pub(crate) status: watch::Sender<CallStatus>,
    pub(crate) media: RwLock<MediaState>,
}

impl CallShared {
    pub(crate) fn new(account: AccountKey, direction: CallDirection) -> Self {
        let (status, _) = watch::channel(CallStatus::Ready);
        Self {
            key: CallKey::new(),
            account,
            direction,
            call_id: OnceLock::new(),
            status,
            media: RwLock::new(MediaState::default()),
        }
    }

    pub(crate) fn current_status(&self) -> CallStatus {
        *self.status.borrow()
    }

    pub(crate) fn call_id(&self) -> Option<CallId> {
        self.call_id.get().copied()
    }
}

/// Handle to a call session
///
/// Handles are cheap to clone; all clones refer to the same session.
#[derive(Clone)]
pub struct Call {
    shared: Arc<CallShared>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Call {
    pub(crate) fn from_parts(shared: Arc<CallShared>, tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { shared, tx }
    }

    /// Create an outgoing call from `account`. Use [`begin`](Self::begin) to dial.
    ///
    /// # Errors
    ///
    /// `ClientError::InvalidArgument` if the destination or identity fields
    /// are malformed or the account has been closed. No call is created.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use rvoip_softphone_core::{Account, Call, OutgoingCall};
    /// # async fn example(account: Account) -> Result<(), Box<dyn std::error::Error>> {
    /// let call = Call::outgoing(
    ///     &account,
    ///     OutgoingCall::new("sip:bob@example.com").with_caller_id("Alice"),
    /// )?;
    /// call.begin().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn outgoing(account: &Account, request: OutgoingCall) -> ClientResult<Call> {
        request.validate()?;
        if account.is_closed() {
            return Err(ClientError::invalid_argument("account", "account has been closed"));
        }

        let shared = Arc::new(CallShared::new(account.key(), CallDirection::Outgoing(request)));
        let tx = account.sender().clone();
        tx.send(Envelope::AddCall(shared.clone()))
            .map_err(|_| ClientError::RuntimeStopped)?;
        Ok(Self { shared, tx })
    }

    pub fn key(&self) -> CallKey {
        self.shared.key
    }

    /// Engine-assigned id. Incoming calls have it from the start, outgoing
    /// calls once the engine acknowledges the INVITE.
    pub fn call_id(&self) -> Option<CallId> {
        self.shared.call_id()
    }

    /// Key of the account this call belongs to
    pub fn account_key(&self) -> AccountKey {
        self.shared.account
    }

    pub fn direction(&self) -> &CallDirection {
        &self.shared.direction
    }

    pub fn is_incoming(&self) -> bool {
        self.shared.direction.is_incoming()
    }

    pub fn status(&self) -> CallStatus {
        self.shared.current_status()
    }

    /// Observe status changes
    pub fn watch_status(&self) -> watch::Receiver<CallStatus> {
        self.shared.status.subscribe()
    }

    /// True while Calling, Connecting or Connected
    pub fn is_active(&self) -> bool {
        self.status().is_active()
    }

    /// Speaker volume last confirmed by the engine
    pub fn volume(&self) -> f32 {
        self.shared.media.read().volume
    }

    /// Microphone volume last confirmed by the engine
    pub fn mic_volume(&self) -> f32 {
        self.shared.media.read().mic_volume
    }

    pub fn is_microphone_muted(&self) -> bool {
        self.shared.media.read().microphone_muted
    }

    pub fn is_on_hold(&self) -> bool {
        self.shared.media.read().on_hold
    }

    pub fn is_speaker_active(&self) -> bool {
        self.shared.media.read().speaker
    }

    pub fn is_ringback_active(&self) -> bool {
        self.shared.media.read().ringback_active
    }

    pub fn is_audio_session_open(&self) -> bool {
        self.shared.media.read().audio_session_open
    }

    /// The other party of the call
    pub fn remote_uri(&self) -> &str {
        self.shared.direction.remote_uri()
    }

    /// Look up a header of the INVITE that created an incoming call
    ///
    /// Returns `None` for outgoing calls and for headers that are absent.
    pub fn custom_header(&self, name: &str) -> Option<String> {
        match &self.shared.direction {
            CallDirection::Incoming(incoming) => headers::find_header(&incoming.raw_message, name),
            CallDirection::Outgoing(_) => None,
        }
    }

    /// Dial an outgoing call, or answer an incoming one
    ///
    /// # Errors
    ///
    /// * `ClientError::InvalidCallState` - the call is not Ready
    /// * `ClientError::AccountGone` - the owning account was closed
    /// * `ClientError::NotConfigured` - the owning account was never configured
    pub async fn begin(&self) -> ClientResult<()> {
        self.request(CallOp::Begin).await
    }

    /// Hang up, cancel or reject the call
    ///
    /// Fails with `InvalidCallState` when the call is already Disconnected,
    /// so a second `end` produces no second transition.
    pub async fn end(&self) -> ClientResult<()> {
        self.request(CallOp::End).await
    }

    /// Request a speaker volume in `[0.0, 1.0]`; larger values are clamped.
    /// The stored volume changes when the engine confirms.
    pub async fn set_volume(&self, volume: f32) -> ClientResult<()> {
        self.request(CallOp::SetGain(GainChannel::Speaker, volume)).await
    }

    /// Request a microphone volume in `[0.0, 1.0]`; larger values are clamped.
    pub async fn set_mic_volume(&self, volume: f32) -> ClientResult<()> {
        self.request(CallOp::SetGain(GainChannel::Microphone, volume)).await
    }

    pub async fn mute_microphone(&self) -> ClientResult<()> {
        self.request(CallOp::SetMicrophoneMuted(true)).await
    }

    pub async fn unmute_microphone(&self) -> ClientResult<()> {
        self.request(CallOp::SetMicrophoneMuted(false)).await
    }

    /// Send DTMF digits. Only valid while Connected.
    pub async fn send_dtmf_digits(&self, digits: &str) -> ClientResult<()> {
        self.request(CallOp::SendDigits(digits.to_string())).await
    }

    pub async fn hold_call(&self) -> ClientResult<()> {
        self.request(CallOp::SetHold(true)).await
    }

    pub async fn remove_hold_call(&self) -> ClientResult<()> {
        self.request(CallOp::SetHold(false)).await
    }

    /// Route call audio to the loudspeaker
    pub async fn use_speaker(&self) -> ClientResult<()> {
        self.request(CallOp::RouteAudio(true)).await
    }

    pub async fn stop_speaker(&self) -> ClientResult<()> {
        self.request(CallOp::RouteAudio(false)).await
    }

    /// Acquire the audio hardware route for this call
    ///
    /// Opening an already open session is a no-op. The session is closed
    /// automatically when the call disconnects.
    pub async fn open_audio_session(&self) -> ClientResult<()> {
        self.request(CallOp::OpenAudioSession).await
    }

    /// Release the audio hardware route early. Closing twice is a no-op.
    pub async fn close_audio_session(&self) -> ClientResult<()> {
        self.request(CallOp::CloseAudioSession).await
    }

    /// Set the observer for this call. The call does not keep it alive.
    pub fn set_delegate<D: CallDelegate + 'static>(&self, delegate: &Arc<D>) {
        let weak: Weak<dyn CallDelegate> = Arc::downgrade(delegate) as Weak<dyn CallDelegate>;
        let _ = self.tx.send(Envelope::CallDelegate {
            key: self.shared.key,
            delegate: Some(weak),
        });
    }

    pub fn clear_delegate(&self) {
        let _ = self.tx.send(Envelope::CallDelegate {
            key: self.shared.key,
            delegate: None,
        });
    }

    async fn request(&self, op: CallOp) -> ClientResult<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope::Call {
                key: self.shared.key,
                op,
                reply,
            })
            .map_err(|_| ClientError::RuntimeStopped)?;
        rx.await.map_err(|_| ClientError::RuntimeStopped)?
    }
}

impl PartialEq for Call {
    fn eq(&self, other: &Self) -> bool {
        self.shared.key == other.shared.key
    }
}

impl Eq for Call {}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("key", &self.shared.key)
            .field("call_id", &self.call_id())
            .field("status", &self.status())
            .field("incoming", &self.is_incoming())
            .finish()
    }
}
