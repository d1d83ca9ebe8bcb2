//! Runtime configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

/// Configuration of a [`SessionRuntime`](crate::SessionRuntime)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Buffer size of the [`SessionEvent`](crate::SessionEvent) broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// How many accounts may be registering or registered at the same time
    #[serde(default = "default_max_active_accounts")]
    pub max_active_accounts: usize,
    /// End incoming calls the application has not answered within this time
    #[serde(default)]
    pub incoming_call_timeout: Option<Duration>,
    /// Open the audio session automatically when a call reaches Connected
    #[serde(default = "default_auto_audio_session")]
    pub auto_audio_session: bool,
}

fn default_event_capacity() -> usize {
    1000
}

fn default_max_active_accounts() -> usize {
    1
}

fn default_auto_audio_session() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            max_active_accounts: default_max_active_accounts(),
            incoming_call_timeout: None,
            auto_audio_session: default_auto_audio_session(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_max_active_accounts(mut self, limit: usize) -> Self {
        self.max_active_accounts = limit;
        self
    }

    pub fn with_incoming_call_timeout(mut self, timeout: Duration) -> Self {
        self.incoming_call_timeout = Some(timeout);
        self
    }

    pub fn with_auto_audio_session(mut self, enabled: bool) -> Self {
        self.auto_audio_session = enabled;
        self
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.event_capacity == 0 {
            return Err(ClientError::configuration("event_capacity", "must be greater than zero"));
        }
        if self.max_active_accounts == 0 {
            return Err(ClientError::configuration(
                "max_active_accounts",
                "must be greater than zero",
            ));
        }
        if self.incoming_call_timeout == Some(Duration::ZERO) {
            return Err(ClientError::configuration(
                "incoming_call_timeout",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.event_capacity, 1000);
        assert_eq!(config.max_active_accounts, 1);
        assert_eq!(config.incoming_call_timeout, None);
        assert!(config.auto_audio_session);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(RuntimeConfig::new().with_event_capacity(0).validate().is_err());
        assert!(RuntimeConfig::new().with_max_active_accounts(0).validate().is_err());
        assert!(
            RuntimeConfig::new()
                .with_incoming_call_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }
}
