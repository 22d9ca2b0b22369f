//! Outbound sends: guest limit, billing, optimistic updates and rollback.

use crate::helpers::{FakeBilling, Harness, HarnessOptions};
use avatar_session::billing::PaywallReason;
use avatar_session::session::{ChatRole, FileLocalStore, Identity, LocalStore};
use avatar_session::{AiState, RuntimeEvent, SendOutcome};
use std::sync::Arc;

fn authenticated(billing: FakeBilling) -> (HarnessOptions, Arc<FakeBilling>) {
    let billing = Arc::new(billing);
    let options = HarnessOptions {
        identity: Identity::Authenticated {
            user_id: "user-42".to_owned(),
        },
        billing: Some(Arc::clone(&billing)),
        ..HarnessOptions::default()
    };
    (options, billing)
}

// ─── Dispatch ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_dispatches_to_active_session() {
    let mut h = Harness::connected().await;
    h.drain();

    let outcome = h.handle.send_message("  Hello  ").await.unwrap();

    assert_eq!(outcome, SendOutcome::Sent);
    let sent = h.gateway.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, "Hello", "text is trimmed before dispatch");
    assert_eq!(Some(sent[0].0.clone()), h.handle.active_session());
    assert_eq!(h.handle.ai_state(), AiState::ThinkingSpeaking);

    let messages = h.handle.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, ChatRole::User);
    assert_eq!(messages[0].content, "Hello");

    let events = h.drain();
    assert!(events.contains(&RuntimeEvent::SendingChanged { active: true }));
    assert!(events.iter().any(|e| matches!(
        e,
        RuntimeEvent::MessageAppended { message } if message.content == "Hello"
    )));
}

#[tokio::test]
async fn test_blank_send_is_ignored() {
    let h = Harness::connected().await;
    let outcome = h.handle.send_message("   ").await.unwrap();
    assert_eq!(outcome, SendOutcome::Ignored);
    assert!(h.gateway.sent().is_empty());
    assert_eq!(h.handle.ai_state(), AiState::Idle);
}

#[tokio::test]
async fn test_nudge_is_sent_but_not_shown() {
    let h = Harness::connected().await;
    let outcome = h.handle.send_nudge("Are you still there?").await.unwrap();
    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(h.gateway.sent_texts(), vec!["Are you still there?"]);
    assert!(h.handle.messages().is_empty(), "nudges are not user messages");
    assert_eq!(h.handle.ai_state(), AiState::ThinkingSpeaking);
}

// ─── Failure and rollback ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_while_disconnected_fails_and_rolls_back() {
    let mut h = Harness::start().await;
    h.drain();

    let result = h.handle.send_message("Hello").await;

    assert!(result.is_err());
    assert!(h.gateway.sent().is_empty());
    assert_eq!(h.handle.ai_state(), AiState::Idle);
    assert!(!h.handle.is_sending());
    assert!(h.handle.messages().is_empty(), "optimistic message removed");

    let events = h.drain();
    assert!(events.iter().any(|e| matches!(
        e,
        RuntimeEvent::SendFailed { text, .. } if text == "Hello"
    )));
    assert!(events.iter().any(|e| matches!(e, RuntimeEvent::MessageRemoved { .. })));
}

#[tokio::test]
async fn test_failed_send_does_not_consume_guest_allowance() {
    let h = Harness::connected().await;
    h.gateway.fail_sends(true);
    for _ in 0..3 {
        assert!(h.handle.send_message("lost").await.is_err());
    }

    h.gateway.fail_sends(false);
    for i in 0..5 {
        let outcome = h.handle.send_message(&format!("message {i}")).await.unwrap();
        assert_eq!(outcome, SendOutcome::Sent, "send {i} should pass the guest limit");
    }
}

// ─── Guest limit ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sixth_guest_message_hits_paywall_before_network() {
    let billing = Arc::new(FakeBilling::allowing());
    let mut h = Harness::connected_with(HarnessOptions {
        billing: Some(Arc::clone(&billing)),
        ..HarnessOptions::default()
    })
    .await;

    for i in 0..5 {
        let outcome = h.handle.send_message(&format!("message {i}")).await.unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
    }
    h.drain();

    let outcome = h.handle.send_message("one more").await.unwrap();

    assert_eq!(outcome, SendOutcome::Blocked(PaywallReason::GuestLimit));
    assert_eq!(h.gateway.sent().len(), 5, "blocked message never dispatched");
    assert_eq!(billing.calls(), 0, "guests are not billed");
    assert!(!h.handle.is_sending());
    assert!(h.handle.messages().iter().all(|m| m.content != "one more"));
    assert!(h.drain().iter().any(|e| matches!(
        e,
        RuntimeEvent::Paywall {
            reason: PaywallReason::GuestLimit,
            ..
        }
    )));
}

#[tokio::test]
async fn test_guest_limit_applies_to_nudges_without_counting_them() {
    let h = Harness::connected().await;
    for _ in 0..3 {
        h.handle.send_nudge("ping").await.unwrap();
    }
    for i in 0..5 {
        assert_eq!(
            h.handle.send_message(&format!("m{i}")).await.unwrap(),
            SendOutcome::Sent
        );
    }
    assert_eq!(
        h.handle.send_nudge("ping").await.unwrap(),
        SendOutcome::Blocked(PaywallReason::GuestLimit)
    );
}

#[tokio::test]
async fn test_guest_counter_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();

    {
        let store: Arc<dyn LocalStore> = Arc::new(FileLocalStore::open_in(dir.path()).unwrap());
        let h = Harness::connected_with(HarnessOptions {
            store: Some(store),
            ..HarnessOptions::default()
        })
        .await;
        for i in 0..5 {
            h.handle.send_message(&format!("m{i}")).await.unwrap();
        }
        h.handle.shutdown();
    }

    let store: Arc<dyn LocalStore> = Arc::new(FileLocalStore::open_in(dir.path()).unwrap());
    let h = Harness::connected_with(HarnessOptions {
        store: Some(store),
        ..HarnessOptions::default()
    })
    .await;
    assert_eq!(
        h.handle.send_message("after restart").await.unwrap(),
        SendOutcome::Blocked(PaywallReason::GuestLimit)
    );
}

// ─── Billing ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_billing_denial_blocks_dispatch() {
    let (options, billing) = authenticated(FakeBilling::denying("insufficient_credits"));
    let mut h = Harness::connected_with(options).await;
    h.drain();

    let outcome = h.handle.send_message("Hello").await.unwrap();

    assert_eq!(
        outcome,
        SendOutcome::Blocked(PaywallReason::InsufficientCredits)
    );
    assert_eq!(billing.calls(), 1);
    assert!(h.gateway.sent().is_empty());
    assert!(h.handle.messages().is_empty());
    assert_eq!(h.handle.ai_state(), AiState::Idle);
    assert!(h.drain().iter().any(|e| matches!(
        e,
        RuntimeEvent::Paywall {
            reason: PaywallReason::InsufficientCredits,
            credits_balance: Some(0),
            ..
        }
    )));
}

#[tokio::test]
async fn test_billing_outage_fails_open() {
    let (options, billing) = authenticated(FakeBilling::unreachable());
    let h = Harness::connected_with(options).await;

    let outcome = h.handle.send_message("Hello").await.unwrap();

    assert_eq!(outcome, SendOutcome::Sent);
    assert_eq!(billing.calls(), 1);
    assert_eq!(h.gateway.sent_texts(), vec!["Hello"]);
}

#[tokio::test]
async fn test_authenticated_users_skip_guest_limit() {
    let (options, billing) = authenticated(FakeBilling::allowing());
    let h = Harness::connected_with(options).await;
    for i in 0..7 {
        assert_eq!(
            h.handle.send_message(&format!("m{i}")).await.unwrap(),
            SendOutcome::Sent
        );
    }
    assert_eq!(billing.calls(), 7);
}
