//! Connection lifecycle: connect, outages, reconnect recovery, giving up.

use crate::helpers::{FakeTts, Harness, HarnessOptions, wait_until};
use avatar_session::gateway::{ConnectionState, TransportSignal, TransportState};
use avatar_session::protocol::{ControlSignal, ProtocolEvent, ToolCallStatus};
use avatar_session::{AiState, RuntimeEvent};
use std::time::Duration;

#[tokio::test]
async fn test_connect_opens_and_resolves_session() {
    let mut h = Harness::start().await;
    h.drain();

    h.handle.connect(Some("token".to_owned())).await.unwrap();

    assert_eq!(h.handle.connection_state(), ConnectionState::Open);
    assert!(*h.handle.watch_connection().borrow() == ConnectionState::Open);
    let key = h.handle.active_session().unwrap();
    assert!(h.gateway.history_requests().contains(&key));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let events = h.drain();
    assert!(events.contains(&RuntimeEvent::ConnectionChanged {
        state: ConnectionState::Open
    }));
}

#[tokio::test]
async fn test_connect_failure_leaves_connection_closed() {
    let h = Harness::start().await;
    h.gateway.fail_connects(true);

    assert!(h.handle.connect(None).await.is_err());
    assert_eq!(h.handle.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_disconnect_notification_fires_once_per_outage() {
    let mut h = Harness::connected().await;
    h.drain();

    h.gateway
        .signal(TransportSignal::State(TransportState::Reconnecting));
    h.gateway
        .signal(TransportSignal::State(TransportState::Reconnecting));
    h.gateway
        .signal(TransportSignal::State(TransportState::Disconnected));

    wait_until("closed", || {
        h.handle.connection_state() == ConnectionState::Closed
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let disconnects = h
        .drain()
        .into_iter()
        .filter(|e| *e == RuntimeEvent::Disconnected)
        .count();
    assert_eq!(disconnects, 1);
}

#[tokio::test]
async fn test_reconnect_resets_turn_and_restores_history() {
    let h = Harness::connected().await;
    let key = h.handle.active_session().unwrap();
    h.gateway
        .set_history(key.as_str(), &["earlier answer", "another answer"]);

    h.control(ControlSignal::ConversationChainStart).await;
    h.push(ProtocolEvent::ToolCallStatus {
        id: "t1".to_owned(),
        name: "search".to_owned(),
        category: None,
        status: ToolCallStatus::Running,
        content: None,
    })
    .await;
    h.stream("Partial answer. Still").await;
    wait_until("speaking", || h.audio.has_queued()).await;
    assert_eq!(h.handle.tool_calls().len(), 1);

    h.gateway
        .signal(TransportSignal::State(TransportState::Reconnecting));
    h.gateway.signal(TransportSignal::Reconnected);

    wait_until("history restored", || h.handle.messages().len() == 2).await;
    assert_eq!(h.handle.connection_state(), ConnectionState::Open);
    assert_eq!(h.handle.ai_state(), AiState::Idle);
    assert_eq!(h.handle.subtitle(), "");
    assert!(h.audio.queued().is_empty());
    assert!(h.handle.tool_calls().is_empty());
    assert!(!h.handle.is_sending());
    assert_eq!(h.handle.messages()[0].content, "earlier answer");
}

#[tokio::test]
async fn test_reconnect_discards_synthesis_in_flight() {
    let h = Harness::connected_with(HarnessOptions {
        tts: FakeTts::gated(),
        ..HarnessOptions::default()
    })
    .await;

    h.control(ControlSignal::ConversationChainStart).await;
    h.stream("Half way through. Another one. And").await;
    wait_until("synthesis started", || !h.tts.calls().is_empty()).await;
    let before = h.handle.generation();

    h.gateway
        .signal(TransportSignal::State(TransportState::Reconnecting));
    h.gateway.signal(TransportSignal::Reconnected);
    wait_until("recovered", || h.handle.generation() > before).await;

    h.tts.release(10);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(
        h.audio.received().is_empty(),
        "audio synthesized before the reconnect must never be queued"
    );
    assert_eq!(h.tts.calls(), vec!["Half way through."]);
    assert_eq!(h.handle.ai_state(), AiState::Idle);
}

#[tokio::test]
async fn test_empty_history_after_reconnect_keeps_local_messages() {
    let h = Harness::connected().await;
    h.handle.send_message("kept").await.unwrap();

    h.gateway
        .signal(TransportSignal::State(TransportState::Reconnecting));
    h.gateway.signal(TransportSignal::Reconnected);

    wait_until("idle", || h.handle.ai_state() == AiState::Idle).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let messages = h.handle.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "kept");
}

#[tokio::test]
async fn test_gave_up_notifies_and_manual_reconnect_retries() {
    let mut h = Harness::connected().await;
    h.drain();

    h.gateway.signal(TransportSignal::GaveUp { attempts: 5 });
    wait_until("closed", || {
        h.handle.connection_state() == ConnectionState::Closed
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h
        .drain()
        .contains(&RuntimeEvent::ReconnectGaveUp { attempts: 5 }));

    h.handle.reconnect().await.unwrap();
    assert_eq!(h.gateway.retries(), 1);
}

#[tokio::test]
async fn test_disconnect_clears_sending_flag() {
    let h = Harness::connected().await;
    h.handle.disconnect().await.unwrap();
    assert_eq!(h.handle.connection_state(), ConnectionState::Closed);
    assert!(h.handle.send_message("Hello").await.is_err());
    assert!(!h.handle.is_sending());
}
