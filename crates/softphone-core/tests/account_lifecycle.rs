//! Account registration lifecycle tests
//!
//! Drives accounts through configure, connect and disconnect against a
//! recording engine and checks statuses, completions and notifications.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{Harness, RecordingDelegate, account_config, drain};
use rvoip_softphone_core::{
    Account, AccountConfig, AccountDelegate, AccountStatus, AccountStatusInfo, Call, CallStatus,
    ClientError, EngineCommand, EngineEvent, OutgoingCall, RuntimeConfig, SessionEvent,
};

#[tokio::test]
async fn test_registration_success() {
    let h = Harness::start();
    let delegate = Arc::new(RecordingDelegate::default());
    let account = h.configured_account("alice").await;
    account.set_delegate(&delegate);

    let completed = Arc::new(AtomicUsize::new(0));
    let outcome = Arc::new(parking_lot::Mutex::new(None));
    {
        let completed = completed.clone();
        let outcome = outcome.clone();
        account
            .connect_with(move |success| {
                completed.fetch_add(1, Ordering::SeqCst);
                *outcome.lock() = Some(success);
            })
            .await
            .unwrap();
    }
    assert_eq!(account.status(), AccountStatus::Connecting);

    let account_id = account.account_id().unwrap();
    let commands = h.engine.commands();
    assert!(matches!(
        commands.as_slice(),
        [EngineCommand::Register { account_id: id, .. }] if *id == account_id
    ));

    h.emit(EngineEvent::RegistrationSucceeded { account_id }).await;

    assert!(account.is_connected());
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(*outcome.lock(), Some(true));
    assert_eq!(
        delegate.account_history(),
        vec![AccountStatus::Connecting, AccountStatus::Connected]
    );
}

#[tokio::test]
async fn test_registration_rejected() {
    let h = Harness::start();
    let mut rx = h.runtime.subscribe();
    let account = h.configured_account("alice").await;

    let pending = account.connect().await.unwrap();
    h.emit(EngineEvent::RegistrationFailed {
        account_id: account.account_id().unwrap(),
        reason: "401 Unauthorized".to_string(),
    })
    .await;

    assert!(!pending.outcome().await);
    assert_eq!(account.status(), AccountStatus::Invalid);

    let invalid = drain(&mut rx)
        .into_iter()
        .find_map(|event| match event {
            SessionEvent::AccountStatusChanged(info) if info.status == AccountStatus::Invalid => {
                Some(info)
            }
            _ => None,
        })
        .expect("Invalid transition is broadcast");
    assert_eq!(invalid.previous, AccountStatus::Connecting);
    assert_eq!(invalid.reason.as_deref(), Some("401 Unauthorized"));

    // Invalid is terminal for this instance
    assert_eq!(
        account.connect().await.unwrap_err(),
        ClientError::InvalidAccountState {
            current: AccountStatus::Invalid
        }
    );
}

#[tokio::test]
async fn test_configure_succeeds_once() {
    let h = Harness::start();
    let account = h.configured_account("alice").await;
    let account_id = account.account_id();

    let err = account.configure(account_config("mallory")).await.unwrap_err();
    assert_eq!(err, ClientError::AlreadyConfigured);
    assert_eq!(account.config().unwrap().address, "sip:alice@example.com");
    assert_eq!(account.account_id(), account_id);
    assert_eq!(account.status(), AccountStatus::Offline);
}

#[tokio::test]
async fn test_invalid_configuration_is_not_stored() {
    let h = Harness::start();
    let account = h.runtime.create_account().unwrap();

    let missing_password =
        AccountConfig::new("sip:alice@example.com", "registrar.example.com").with_credentials("alice", "");
    assert!(matches!(
        account.configure(missing_password).await,
        Err(ClientError::Configuration { ref field, .. }) if field == "password"
    ));
    assert!(!account.is_configured());
    assert!(account.account_id().is_none());

    account.configure(account_config("alice")).await.unwrap();
    assert!(account.is_configured());
}

#[tokio::test]
async fn test_connect_requires_configuration() {
    let h = Harness::start();
    let account = h.runtime.create_account().unwrap();

    assert_eq!(account.connect().await.unwrap_err(), ClientError::NotConfigured);
    assert!(h.engine.commands().is_empty());
    assert_eq!(account.status(), AccountStatus::Offline);
}

#[tokio::test]
async fn test_connect_while_connecting_does_not_register_twice() {
    let h = Harness::start();
    let account = h.configured_account("alice").await;

    let first = account.connect().await.unwrap();
    let second = account.connect().await.unwrap();
    assert_eq!(h.engine.count("register"), 1);

    h.emit(EngineEvent::RegistrationSucceeded {
        account_id: account.account_id().unwrap(),
    })
    .await;
    assert!(first.outcome().await);
    assert!(second.outcome().await);

    // Already connected: resolves immediately, still no second REGISTER
    assert!(account.connect().await.unwrap().outcome().await);
    assert_eq!(h.engine.count("register"), 1);
}

#[tokio::test]
async fn test_single_active_account() {
    let h = Harness::start();
    let first = h.connected_account("alice").await;
    let second = h.configured_account("bob").await;

    assert_eq!(
        second.connect().await.unwrap_err(),
        ClientError::AccountLimitReached { limit: 1 }
    );
    assert_eq!(second.status(), AccountStatus::Offline);

    first.disconnect().await.unwrap();
    h.emit(EngineEvent::UnregistrationSucceeded {
        account_id: first.account_id().unwrap(),
    })
    .await;
    assert_eq!(first.status(), AccountStatus::Offline);

    second.connect().await.unwrap();
    assert_eq!(second.status(), AccountStatus::Connecting);
}

#[tokio::test]
async fn test_account_limit_is_configurable() {
    let h = Harness::with_config(RuntimeConfig::default().with_max_active_accounts(2));
    h.connected_account("alice").await;
    let second = h.connected_account("bob").await;
    assert!(second.is_connected());
}

#[tokio::test]
async fn test_disconnect() {
    let h = Harness::start();
    let delegate = Arc::new(RecordingDelegate::default());
    let account = h.connected_account("alice").await;
    account.set_delegate(&delegate);
    let account_id = account.account_id().unwrap();

    account.disconnect().await.unwrap();
    assert_eq!(account.status(), AccountStatus::Disconnecting);
    assert_eq!(
        h.engine.commands().last(),
        Some(&EngineCommand::Unregister { account_id })
    );

    // Only one unregistration may be in flight
    assert_eq!(
        account.disconnect().await.unwrap_err(),
        ClientError::InvalidAccountState {
            current: AccountStatus::Disconnecting
        }
    );

    h.emit(EngineEvent::UnregistrationSucceeded { account_id }).await;
    assert_eq!(account.status(), AccountStatus::Offline);
    assert_eq!(
        delegate.account_history(),
        vec![AccountStatus::Disconnecting, AccountStatus::Offline]
    );

    assert_eq!(
        account.disconnect().await.unwrap_err(),
        ClientError::InvalidAccountState {
            current: AccountStatus::Offline
        }
    );
}

#[tokio::test]
async fn test_disconnect_abandons_pending_registration() {
    let h = Harness::start();
    let account = h.configured_account("alice").await;

    let pending = account.connect().await.unwrap();
    account.disconnect().await.unwrap();
    assert!(!pending.outcome().await);

    // A late success for the abandoned REGISTER changes nothing
    h.emit(EngineEvent::RegistrationSucceeded {
        account_id: account.account_id().unwrap(),
    })
    .await;
    assert_eq!(account.status(), AccountStatus::Disconnecting);
}

#[tokio::test]
async fn test_failed_unregistration_still_goes_offline() {
    let h = Harness::start();
    let mut rx = h.runtime.subscribe();
    let account = h.connected_account("alice").await;

    account.disconnect().await.unwrap();
    h.emit(EngineEvent::UnregistrationFailed {
        account_id: account.account_id().unwrap(),
        reason: "408 Request Timeout".to_string(),
    })
    .await;

    assert_eq!(account.status(), AccountStatus::Offline);
    assert!(drain(&mut rx).iter().any(|event| matches!(
        event,
        SessionEvent::AdapterFailure { account: Some(key), .. } if *key == account.key()
    )));
}

#[tokio::test]
async fn test_refused_register_leaves_status_unchanged() {
    let h = Harness::start();
    h.engine.refuse("register");
    let account = h.configured_account("alice").await;

    assert!(matches!(
        account.connect().await,
        Err(ClientError::AdapterFailure { .. })
    ));
    assert_eq!(account.status(), AccountStatus::Offline);
}

#[tokio::test]
async fn test_only_legal_transitions_are_observed() {
    let h = Harness::start();
    let mut rx = h.runtime.subscribe();
    let account = h.connected_account("alice").await;
    let account_id = account.account_id().unwrap();

    // Stale and out-of-order events
    h.emit(EngineEvent::UnregistrationSucceeded { account_id }).await;
    h.emit(EngineEvent::RegistrationSucceeded { account_id }).await;
    account.disconnect().await.unwrap();
    h.emit(EngineEvent::RegistrationFailed {
        account_id,
        reason: "late".to_string(),
    })
    .await;
    h.emit(EngineEvent::UnregistrationSucceeded { account_id }).await;

    let transitions: Vec<(AccountStatus, AccountStatus)> = drain(&mut rx)
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::AccountStatusChanged(info) => Some((info.previous, info.status)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (AccountStatus::Offline, AccountStatus::Connecting),
            (AccountStatus::Connecting, AccountStatus::Connected),
            (AccountStatus::Connected, AccountStatus::Disconnecting),
            (AccountStatus::Disconnecting, AccountStatus::Offline),
        ]
    );
    assert!(transitions.iter().all(|(from, to)| from.can_transition_to(*to)));
}

#[tokio::test]
async fn test_watch_status() {
    let h = Harness::start();
    let account = h.configured_account("alice").await;
    let mut watcher = account.watch_status();

    account.connect().await.unwrap();
    watcher.changed().await.unwrap();
    assert_eq!(*watcher.borrow_and_update(), AccountStatus::Connecting);

    h.emit(EngineEvent::RegistrationSucceeded {
        account_id: account.account_id().unwrap(),
    })
    .await;
    watcher.changed().await.unwrap();
    assert_eq!(*watcher.borrow_and_update(), AccountStatus::Connected);
}

#[tokio::test]
async fn test_close() {
    let h = Harness::start();
    let account = h.configured_account("alice").await;
    let account_id = account.account_id().unwrap();

    account.close().await.unwrap();
    assert!(account.is_closed());
    assert_eq!(h.engine.removed_accounts(), vec![account_id]);

    assert_eq!(account.connect().await.unwrap_err(), ClientError::AccountGone);
    assert_eq!(account.close().await.unwrap_err(), ClientError::AccountGone);
    assert!(matches!(
        Call::outgoing(&account, OutgoingCall::new("sip:carol@example.com")),
        Err(ClientError::InvalidArgument { .. })
    ));
}

#[tokio::test]
async fn test_close_discards_unstarted_calls() {
    let h = Harness::start();
    let account = h.configured_account("alice").await;
    let outgoing = Call::outgoing(&account, OutgoingCall::new("sip:bob@example.com")).unwrap();
    let delegate = Arc::new(RecordingDelegate::default());
    outgoing.set_delegate(&delegate);
    h.runtime.flush().await.unwrap();

    account.close().await.unwrap();

    assert_eq!(outgoing.status(), CallStatus::Disconnected);
    let statuses = delegate.call_statuses.lock().clone();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].previous, CallStatus::Ready);
    assert_eq!(statuses[0].reason.as_deref(), Some("account closed"));
    assert!(h.engine.commands().is_empty());
    assert_eq!(
        outgoing.begin().await.unwrap_err(),
        ClientError::InvalidCallState {
            call: outgoing.key(),
            current: CallStatus::Disconnected
        }
    );
}

#[tokio::test]
async fn test_close_requires_offline() {
    let h = Harness::start();
    let account = h.connected_account("alice").await;

    assert_eq!(
        account.close().await.unwrap_err(),
        ClientError::InvalidAccountState {
            current: AccountStatus::Connected
        }
    );
    assert!(!account.is_closed());
}

#[tokio::test]
async fn test_close_blocked_by_call_in_progress() {
    let h = Harness::start();
    let account = h.connected_account("alice").await;
    let call = h.connected_call(&account, rvoip_softphone_core::CallId(3)).await;

    account.disconnect().await.unwrap();
    h.emit(EngineEvent::UnregistrationSucceeded {
        account_id: account.account_id().unwrap(),
    })
    .await;

    assert!(matches!(
        account.close().await,
        Err(ClientError::InvalidCallState {
            current: CallStatus::Connected,
            ..
        })
    ));
    call.end().await.unwrap();
    account.close().await.unwrap();
}

struct PanickingDelegate;

impl AccountDelegate for PanickingDelegate {
    fn on_account_status_changed(&self, _account: &Account, _info: &AccountStatusInfo) {
        panic!("delegate bug");
    }
}

#[tokio::test]
async fn test_panicking_delegate_does_not_stop_runtime() {
    let h = Harness::start();
    let account = h.configured_account("alice").await;
    let delegate = Arc::new(PanickingDelegate);
    account.set_delegate(&delegate);

    let pending = account.connect().await.unwrap();
    h.emit(EngineEvent::RegistrationSucceeded {
        account_id: account.account_id().unwrap(),
    })
    .await;

    assert!(pending.outcome().await);
    assert!(h.runtime.is_running());
    assert!(account.is_connected());
}

#[tokio::test]
async fn test_delegate_is_not_retained() {
    let h = Harness::start();
    let account = h.configured_account("alice").await;
    let delegate = Arc::new(RecordingDelegate::default());
    account.set_delegate(&delegate);

    let weak = Arc::downgrade(&delegate);
    drop(delegate);
    assert!(weak.upgrade().is_none());

    account.connect().await.unwrap();
    h.emit(EngineEvent::RegistrationSucceeded {
        account_id: account.account_id().unwrap(),
    })
    .await;
    assert!(account.is_connected());
}

#[tokio::test]
async fn test_operations_fail_after_shutdown() {
    let h = Harness::start();
    let account = h.configured_account("alice").await;
    let pending = account.connect().await.unwrap();

    h.runtime.shutdown().await.unwrap();
    assert!(!pending.outcome().await);
    assert_eq!(account.disconnect().await.unwrap_err(), ClientError::RuntimeStopped);
    assert!(h.runtime.create_account().is_err());
}
