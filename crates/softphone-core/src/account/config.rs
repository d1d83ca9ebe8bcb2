//! Account registration configuration
//!
//! An [`AccountConfig`] is supplied once by the embedding application through
//! [`Account::configure`](crate::Account::configure). It is validated before
//! the engine ever sees it and is immutable afterwards.
//!
//! ```rust
//! use rvoip_softphone_core::{AccountConfig, SipTransport};
//!
//! let config = AccountConfig::new("sip:alice@example.com", "sip:registrar.example.com")
//!     .with_credentials("alice", "secret123")
//!     .with_transport(SipTransport::Tcp)
//!     .with_expires(1800);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.realm, "*");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Signaling transport used for the registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SipTransport {
    #[default]
    Udp,
    Tcp,
    Tls,
}

impl fmt::Display for SipTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipTransport::Udp => write!(f, "UDP"),
            SipTransport::Tcp => write!(f, "TCP"),
            SipTransport::Tls => write!(f, "TLS"),
        }
    }
}

fn default_realm() -> String {
    "*".to_string()
}

fn default_auth_scheme() -> String {
    "digest".to_string()
}

fn default_expires() -> u32 {
    3600
}

fn default_true() -> bool {
    true
}

/// Registration configuration for one SIP account
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Address of record, e.g. `sip:alice@example.com`
    pub address: String,

    /// Registrar (or outbound proxy) the REGISTER is sent to.
    /// A bare `host[:port]` is treated as `sip:host[:port]`.
    pub registrar: String,

    /// Digest authentication username
    #[serde(default)]
    pub username: String,

    /// Digest authentication password. Never logged.
    #[serde(default)]
    pub password: String,

    /// Authentication realm; `*` accepts any realm the server challenges with
    #[serde(default = "default_realm")]
    pub realm: String,

    /// Authentication scheme
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,

    #[serde(default)]
    pub transport: SipTransport,

    /// Requested registration lifetime in seconds
    #[serde(default = "default_expires")]
    pub expires: u32,

    /// Display name placed in the From header
    #[serde(default)]
    pub display_name: Option<String>,

    /// Play a ringback tone while outgoing calls are ringing
    #[serde(default = "default_true")]
    pub enable_ringback: bool,
}

impl AccountConfig {
    /// Create a configuration with default realm, scheme, transport and expiry
    ///
    /// Credentials start empty and must be supplied with
    /// [`with_credentials`](Self::with_credentials) before the configuration validates.
    pub fn new(address: impl Into<String>, registrar: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            registrar: registrar.into(),
            username: String::new(),
            password: String::new(),
            realm: default_realm(),
            auth_scheme: default_auth_scheme(),
            transport: SipTransport::default(),
            expires: default_expires(),
            display_name: None,
            enable_ringback: true,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn with_transport(mut self, transport: SipTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_expires(mut self, expires: u32) -> Self {
        self.expires = expires;
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_ringback(mut self, enabled: bool) -> Self {
        self.enable_ringback = enabled;
        self
    }

    /// Registrar URI with the `sip:` scheme filled in when it was omitted
    pub fn registrar_uri(&self) -> String {
        let registrar = self.registrar.trim();
        if has_sip_scheme(registrar) {
            registrar.to_string()
        } else {
            format!("sip:{registrar}")
        }
    }

    /// Check that the configuration is complete and well formed
    ///
    /// # Errors
    ///
    /// `ClientError::Configuration` naming the first offending field.
    pub fn validate(&self) -> ClientResult<()> {
        let address = parse_sip_uri(&self.address)
            .map_err(|reason| ClientError::configuration("address", reason))?;
        let has_user = address
            .auth
            .as_ref()
            .map(|auth| !auth.user.is_empty())
            .unwrap_or(false);
        if !has_user {
            return Err(ClientError::configuration(
                "address",
                "address of record must include a user part",
            ));
        }

        if self.registrar.trim().is_empty() {
            return Err(ClientError::configuration("registrar", "must not be empty"));
        }
        parse_sip_uri(&self.registrar_uri())
            .map_err(|reason| ClientError::configuration("registrar", reason))?;

        if self.username.trim().is_empty() {
            return Err(ClientError::configuration("username", "must not be empty"));
        }
        if self.password.is_empty() {
            return Err(ClientError::configuration("password", "must not be empty"));
        }
        if self.realm.trim().is_empty() {
            return Err(ClientError::configuration("realm", "must not be empty"));
        }
        if self.expires == 0 {
            return Err(ClientError::configuration("expires", "must be greater than zero"));
        }
        Ok(())
    }
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("address", &self.address)
            .field("registrar", &self.registrar)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("realm", &self.realm)
            .field("auth_scheme", &self.auth_scheme)
            .field("transport", &self.transport)
            .field("expires", &self.expires)
            .field("display_name", &self.display_name)
            .field("enable_ringback", &self.enable_ringback)
            .finish()
    }
}

fn has_sip_scheme(value: &str) -> bool {
    let lower = value.to_ascii_lowercase();
    lower.starts_with("sip:") || lower.starts_with("sips:")
}

fn parse_sip_uri(value: &str) -> Result<rsip::Uri, String> {
    let value = value.trim();
    if !has_sip_scheme(value) {
        return Err(format!("'{value}' is not a sip: or sips: URI"));
    }
    let uri = rsip::Uri::try_from(value).map_err(|e| format!("'{value}' is not a valid SIP URI: {e}"))?;
    if uri.host_with_port.host.to_string().is_empty() {
        return Err(format!("'{value}' has no host"));
    }
    Ok(uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AccountConfig {
        AccountConfig::new("sip:alice@example.com", "sip:registrar.example.com:5060")
            .with_credentials("alice", "secret")
    }

    #[test]
    fn test_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let config = AccountConfig::new("sip:alice@example.com", "sip:registrar.example.com");
        match config.validate() {
            Err(ClientError::Configuration { field, .. }) => assert_eq!(field, "username"),
            other => panic!("unexpected result: {:?}", other),
        }

        let config = valid().with_credentials("alice", "");
        match config.validate() {
            Err(ClientError::Configuration { field, .. }) => assert_eq!(field, "password"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_address_requires_sip_uri_with_user() {
        let mut config = valid();
        config.address = "alice@example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ClientError::Configuration { ref field, .. }) if field == "address"
        ));

        config.address = "sip:example.com".to_string();
        assert!(matches!(
            config.validate(),
            Err(ClientError::Configuration { ref field, .. }) if field == "address"
        ));
    }

    #[test]
    fn test_bare_registrar_host_is_accepted() {
        let mut config = valid();
        config.registrar = "registrar.example.com:5060".to_string();
        assert_eq!(config.registrar_uri(), "sip:registrar.example.com:5060");
        assert!(config.validate().is_ok());

        config.registrar = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ClientError::Configuration { ref field, .. }) if field == "registrar"
        ));
    }

    #[test]
    fn test_zero_expiry_rejected() {
        let config = valid().with_expires(0);
        assert!(matches!(
            config.validate(),
            Err(ClientError::Configuration { ref field, .. }) if field == "expires"
        ));
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let debug = format!("{:?}", valid());
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let json = r#"{
            "address": "sip:bob@example.org",
            "registrar": "sip:example.org",
            "username": "bob",
            "password": "hunter2",
            "transport": "tls"
        }"#;
        let config: AccountConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.realm, "*");
        assert_eq!(config.auth_scheme, "digest");
        assert_eq!(config.expires, 3600);
        assert_eq!(config.transport, SipTransport::Tls);
        assert!(config.enable_ringback);
        assert!(config.validate().is_ok());
    }
}
