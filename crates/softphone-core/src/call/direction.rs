//! Direction-specific call data
//!
//! A call is either placed by the application ([`OutgoingCall`]) or offered
//! by the network ([`IncomingCall`]). The shared state machine lives in
//! [`Call`](crate::Call); this module only carries what each direction needs
//! at construction time.

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Identity headers attached to an outgoing INVITE
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Caller id presented to the callee
    pub caller_id: Option<String>,
    /// Application user id of the caller
    pub user_id: Option<String>,
    /// Application user id of the callee, for calls inside the same service
    pub internal_to_user_id: Option<String>,
    /// Marker for app-to-app calls
    pub app_to_app: Option<String>,
}

impl CallerIdentity {
    fn fields(&self) -> [(&'static str, Option<&str>); 4] {
        [
            ("caller_id", self.caller_id.as_deref()),
            ("user_id", self.user_id.as_deref()),
            ("internal_to_user_id", self.internal_to_user_id.as_deref()),
            ("app_to_app", self.app_to_app.as_deref()),
        ]
    }

    /// Identity values end up in SIP headers and must not contain line breaks
    pub fn validate(&self) -> ClientResult<()> {
        for (field, value) in self.fields() {
            if let Some(value) = value {
                if value.contains(['\r', '\n']) {
                    return Err(ClientError::invalid_argument(field, "must not contain line breaks"));
                }
            }
        }
        Ok(())
    }
}

/// Construction data of an application-initiated call
///
/// ```rust
/// use rvoip_softphone_core::OutgoingCall;
///
/// let request = OutgoingCall::new("sip:bob@example.com")
///     .with_caller_id("+15551234567")
///     .with_user_id("alice-42");
///
/// assert!(request.validate().is_ok());
/// assert!(OutgoingCall::new("   ").validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingCall {
    /// Destination URI or dialable number
    pub remote_uri: String,
    #[serde(default)]
    pub identity: CallerIdentity,
}

impl OutgoingCall {
    pub fn new(remote_uri: impl Into<String>) -> Self {
        Self {
            remote_uri: remote_uri.into(),
            identity: CallerIdentity::default(),
        }
    }

    pub fn with_caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.identity.caller_id = Some(caller_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.identity.user_id = Some(user_id.into());
        self
    }

    pub fn with_internal_to_user_id(mut self, internal_to_user_id: impl Into<String>) -> Self {
        self.identity.internal_to_user_id = Some(internal_to_user_id.into());
        self
    }

    pub fn with_app_to_app(mut self, app_to_app: impl Into<String>) -> Self {
        self.identity.app_to_app = Some(app_to_app.into());
        self
    }

    /// Check the destination and identity fields
    ///
    /// # Errors
    ///
    /// `ClientError::InvalidArgument` if the destination is empty or any
    /// field contains characters that cannot be carried in a SIP header.
    pub fn validate(&self) -> ClientResult<()> {
        let remote_uri = self.remote_uri.trim();
        if remote_uri.is_empty() {
            return Err(ClientError::invalid_argument("remote_uri", "must not be empty"));
        }
        if remote_uri.chars().any(|c| c.is_control()) {
            return Err(ClientError::invalid_argument(
                "remote_uri",
                "must not contain control characters",
            ));
        }
        self.identity.validate()
    }
}

/// Construction data of a network-initiated call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    /// URI of the calling party
    pub from_uri: String,
    /// The INVITE that created the call
    pub raw_message: String,
}

/// Which side initiated the call, with its construction data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallDirection {
    Outgoing(OutgoingCall),
    Incoming(IncomingCall),
}

impl CallDirection {
    pub fn is_incoming(&self) -> bool {
        matches!(self, CallDirection::Incoming(_))
    }

    pub fn is_outgoing(&self) -> bool {
        matches!(self, CallDirection::Outgoing(_))
    }

    /// The other party: destination for outgoing calls, caller for incoming ones
    pub fn remote_uri(&self) -> &str {
        match self {
            CallDirection::Outgoing(outgoing) => &outgoing.remote_uri,
            CallDirection::Incoming(incoming) => &incoming.from_uri,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_destination_rejected() {
        for uri in ["", "  ", "\t"] {
            match OutgoingCall::new(uri).validate() {
                Err(ClientError::InvalidArgument { field, .. }) => assert_eq!(field, "remote_uri"),
                other => panic!("unexpected result for {uri:?}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_identity_header_injection_rejected() {
        let request = OutgoingCall::new("sip:bob@example.com").with_caller_id("bob\r\nX-Evil: 1");
        match request.validate() {
            Err(ClientError::InvalidArgument { field, .. }) => assert_eq!(field, "caller_id"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_remote_uri_by_direction() {
        let outgoing = CallDirection::Outgoing(OutgoingCall::new("sip:bob@example.com"));
        assert_eq!(outgoing.remote_uri(), "sip:bob@example.com");
        assert!(outgoing.is_outgoing());

        let incoming = CallDirection::Incoming(IncomingCall {
            from_uri: "sip:carol@example.com".to_string(),
            raw_message: String::new(),
        });
        assert_eq!(incoming.remote_uri(), "sip:carol@example.com");
        assert!(incoming.is_incoming());
    }
}
