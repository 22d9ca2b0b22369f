//! Session switching, creation, deletion and identity changes.

use crate::helpers::{Harness, wait_until};
use avatar_session::session::{Identity, SessionKey, SwitchOutcome};
use avatar_session::{AiState, RuntimeEvent};

#[tokio::test]
async fn test_slow_switch_is_superseded_by_newer_switch() {
    let mut h = Harness::connected().await;
    h.gateway.set_history("A", &["from A"]);
    h.gateway.set_history("B", &["from B"]);
    h.gateway.hold_history("A");
    h.drain();

    let handle = h.handle.clone();
    let slow = tokio::spawn(async move { handle.switch_session(SessionKey::new("A")).await });
    wait_until("fetch for A in flight", || {
        h.gateway.history_requests().contains(&SessionKey::new("A"))
    })
    .await;
    assert_eq!(h.handle.ai_state(), AiState::Loading);

    let outcome = h.handle.switch_session(SessionKey::new("B")).await.unwrap();
    match outcome {
        SwitchOutcome::Applied(messages) => {
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].content, "from B");
        }
        SwitchOutcome::Superseded => panic!("the newest switch must apply"),
    }

    h.gateway.release_history("A");
    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow, SwitchOutcome::Superseded);

    assert_eq!(h.handle.active_session(), Some(SessionKey::new("B")));
    let messages = h.handle.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "from B");
    assert_eq!(h.handle.ai_state(), AiState::Idle);

    let replaced: Vec<SessionKey> = h
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            RuntimeEvent::MessagesReplaced { session, .. } => Some(session),
            _ => None,
        })
        .collect();
    assert_eq!(replaced, vec![SessionKey::new("B")], "stale history never published");
}

#[tokio::test]
async fn test_switch_superseded_by_new_session_stops_loading() {
    let h = Harness::connected().await;
    h.gateway.hold_history("A");

    let handle = h.handle.clone();
    let slow = tokio::spawn(async move { handle.switch_session(SessionKey::new("A")).await });
    wait_until("loading A", || h.handle.ai_state() == AiState::Loading).await;

    let fresh = h.handle.create_session().await.unwrap();
    h.gateway.release_history("A");

    assert_eq!(slow.await.unwrap().unwrap(), SwitchOutcome::Superseded);
    assert_eq!(h.handle.active_session(), Some(fresh));
    assert_eq!(h.handle.ai_state(), AiState::Idle);
}

#[tokio::test]
async fn test_switch_superseded_by_identity_change_stops_loading() {
    let h = Harness::connected().await;
    h.gateway.hold_history("A");

    let handle = h.handle.clone();
    let slow = tokio::spawn(async move { handle.switch_session(SessionKey::new("A")).await });
    wait_until("loading A", || h.handle.ai_state() == AiState::Loading).await;

    h.handle
        .set_identity(Identity::Authenticated {
            user_id: "user-9".to_owned(),
        })
        .await
        .unwrap();
    h.gateway.release_history("A");

    assert_eq!(slow.await.unwrap().unwrap(), SwitchOutcome::Superseded);
    assert_eq!(h.handle.ai_state(), AiState::Idle);
}

#[tokio::test]
async fn test_switch_to_empty_session_clears_messages() {
    let h = Harness::connected().await;
    h.handle.send_message("hello").await.unwrap();
    assert_eq!(h.handle.messages().len(), 1);

    let outcome = h
        .handle
        .switch_session(SessionKey::new("empty"))
        .await
        .unwrap();

    assert_eq!(outcome, SwitchOutcome::Applied(Vec::new()));
    assert!(h.handle.messages().is_empty());
}

#[tokio::test]
async fn test_create_session_starts_fresh() {
    let h = Harness::connected().await;
    let original = h.handle.active_session().unwrap();
    h.handle.send_message("hello").await.unwrap();

    let fresh = h.handle.create_session().await.unwrap();

    assert_ne!(fresh, original);
    assert!(fresh.as_str().starts_with(original.as_str()));
    assert_eq!(h.handle.active_session(), Some(fresh));
    assert!(h.handle.messages().is_empty());
}

#[tokio::test]
async fn test_deleting_active_session_creates_new_one() {
    let h = Harness::connected().await;
    let active = h.handle.active_session().unwrap();

    let replacement = h.handle.delete_session(&active).await.unwrap();

    let replacement = replacement.expect("a new session replaces the deleted one");
    assert_ne!(replacement, active);
    assert_eq!(h.handle.active_session(), Some(replacement));
    assert_eq!(h.gateway.deleted(), vec![active]);
}

#[tokio::test]
async fn test_deleting_other_session_keeps_active() {
    let h = Harness::connected().await;
    let active = h.handle.active_session().unwrap();
    h.gateway.set_history("old", &["bye"]);

    let replacement = h
        .handle
        .delete_session(&SessionKey::new("old"))
        .await
        .unwrap();

    assert!(replacement.is_none());
    assert_eq!(h.handle.active_session(), Some(active));
    assert!(h.handle.list_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_sessions_reports_backend_sessions() {
    let h = Harness::connected().await;
    h.gateway.set_history("a", &["one"]);
    h.gateway.set_history("b", &["one", "two"]);

    let sessions = h.handle.list_sessions().await.unwrap();

    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0].key, SessionKey::new("a"));
    assert_eq!(sessions[1].message_count, 2);
}

#[tokio::test]
async fn test_switching_identity_resets_to_that_identity_session() {
    let h = Harness::connected().await;
    let guest_key = h.handle.active_session().unwrap();
    h.handle.send_message("as guest").await.unwrap();

    let key = h
        .handle
        .set_identity(Identity::Authenticated {
            user_id: "user-7".to_owned(),
        })
        .await
        .unwrap();

    assert_ne!(key, guest_key);
    assert!(key.as_str().contains("user-7"));
    assert_eq!(h.handle.active_session(), Some(key));
    assert!(h.handle.messages().is_empty());
    assert!(!h.handle.identity().is_guest());
}

#[tokio::test]
async fn test_restore_history_replaces_only_when_non_empty() {
    let h = Harness::connected().await;
    h.handle.send_message("local").await.unwrap();

    assert_eq!(h.handle.restore_history().await.unwrap(), None);
    assert_eq!(h.handle.messages().len(), 1);

    let key = h.handle.active_session().unwrap();
    h.gateway.set_history(key.as_str(), &["server copy"]);
    let restored = h.handle.restore_history().await.unwrap().unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(h.handle.messages()[0].content, "server copy");
}
