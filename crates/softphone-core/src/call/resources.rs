//! Engine-side resources scoped to one call
//!
//! The ringback tone player and the audio hardware route are acquired by
//! issuing a start command and released by dropping the guard, so release
//! happens exactly once on every exit path: normal hangup, remote failure,
//! or runtime shutdown.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::call::CallKey;
use crate::engine::{EngineCommand, SipEngine};
use crate::error::ClientResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceKind {
    Ringback,
    AudioSession,
}

impl ResourceKind {
    fn acquire(self, call: CallKey) -> EngineCommand {
        match self {
            ResourceKind::Ringback => EngineCommand::StartRingback { call },
            ResourceKind::AudioSession => EngineCommand::OpenAudioSession { call },
        }
    }

    fn release(self, call: CallKey) -> EngineCommand {
        match self {
            ResourceKind::Ringback => EngineCommand::StopRingback { call },
            ResourceKind::AudioSession => EngineCommand::CloseAudioSession { call },
        }
    }
}

/// Held while the resource is acquired; dropping it releases the resource
pub(crate) struct CallResource {
    kind: ResourceKind,
    call: CallKey,
    engine: Arc<dyn SipEngine>,
}

impl CallResource {
    pub(crate) fn acquire(kind: ResourceKind, call: CallKey, engine: Arc<dyn SipEngine>) -> ClientResult<Self> {
        engine.submit(kind.acquire(call))?;
        debug!("Acquired {:?} for call {}", kind, call);
        Ok(Self { kind, call, engine })
    }
}

impl Drop for CallResource {
    fn drop(&mut self) {
        match self.engine.submit(self.kind.release(self.call)) {
            Ok(()) => debug!("Released {:?} for call {}", self.kind, self.call),
            Err(e) => warn!("Failed to release {:?} for call {}: {}", self.kind, self.call, e),
        }
    }
}

impl fmt::Debug for CallResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallResource")
            .field("kind", &self.kind)
            .field("call", &self.call)
            .finish()
    }
}
