//! SIP account registration and call session state machines
//!
//! `rvoip-softphone-core` sequences the asynchronous results of a native SIP
//! engine into two small, observable state machines:
//!
//! - [`Account`] - one registration with a SIP registrar
//!   (Offline, Connecting, Connected, Invalid, Disconnecting)
//! - [`Call`] - one outgoing or incoming voice session
//!   (Ready, Calling, Connecting, Connected, Disconnected)
//!
//! The engine itself (transport, SIP wire format, RTP, audio devices) lives
//! behind the [`SipEngine`] trait. The core only issues intents to it and
//! consumes its [`EngineEvent`]s.
//!
//! # Architecture
//!
//! ```text
//!   application                 SessionRuntime task              native engine
//!  ┌────────────┐  operations  ┌──────────────────────┐ commands ┌──────────┐
//!  │ Account    │ ───────────► │ SessionCore          │ ───────► │ SipEngine│
//!  │ Call       │              │  account registry    │          │          │
//!  │ delegates  │ ◄─────────── │  call registry       │ ◄─────── │          │
//!  └────────────┘ notifications└──────────────────────┘  events  └──────────┘
//! ```
//!
//! Every mutation happens on one serialized context, so application commands
//! and engine events never race.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_softphone_core::{
//!     AccountConfig, Call, OutgoingCall, RuntimeConfig, SessionRuntime, SipEngine,
//! };
//!
//! # async fn example(engine: Arc<dyn SipEngine>) -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = SessionRuntime::start(engine, RuntimeConfig::default())?;
//!
//! let account = runtime.create_account()?;
//! account
//!     .configure(
//!         AccountConfig::new("sip:alice@example.com", "sip:registrar.example.com")
//!             .with_credentials("alice", "secret123"),
//!     )
//!     .await?;
//!
//! if account.connect().await?.outcome().await {
//!     let call = Call::outgoing(&account, OutgoingCall::new("sip:bob@example.com"))?;
//!     call.begin().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod call;
pub mod engine;
pub mod error;
pub mod events;
pub mod logging;
pub mod runtime;

// Re-export main types
pub use account::config::{AccountConfig, SipTransport};
pub use account::{Account, AccountKey, AccountStatus, PendingRegistration};
pub use call::direction::{CallDirection, CallerIdentity, IncomingCall, OutgoingCall};
pub use call::{Call, CallKey, CallStatus, GainChannel};
pub use engine::{
    AccountId, CallId, EngineCommand, EngineEvent, EngineEventSender, IncomingInvite, SipEngine,
};
pub use error::{ClientError, ClientResult};
pub use events::{AccountDelegate, AccountStatusInfo, CallDelegate, CallStatusInfo, SessionEvent};
pub use logging::{LOG_TARGET, LogFormat, LoggingConfig, parse_log_level, setup_logging};
pub use runtime::SessionRuntime;
pub use runtime::config::RuntimeConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
