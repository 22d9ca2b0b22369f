//! Routing of individual protocol events and the microphone signals.

use crate::helpers::{Harness, wait_until};
use avatar_session::protocol::{ControlSignal, ProtocolEvent, ToolCallStatus};
use avatar_session::{AiState, RuntimeEvent, SendOutcome};
use std::time::Duration;

fn tool_call(status: ToolCallStatus, category: Option<&str>, content: Option<&str>) -> ProtocolEvent {
    ProtocolEvent::ToolCallStatus {
        id: "call-1".to_owned(),
        name: "web_search".to_owned(),
        category: category.map(str::to_owned),
        status,
        content: content.map(str::to_owned),
    }
}

// ─── Tool calls ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_tool_call_updates_in_place() {
    let h = Harness::connected().await;
    h.control(ControlSignal::ConversationChainStart).await;
    h.push(tool_call(ToolCallStatus::Running, Some("search"), None))
        .await;
    h.push(tool_call(ToolCallStatus::Completed, None, Some("3 results")))
        .await;

    wait_until("completed", || {
        h.handle
            .tool_calls()
            .first()
            .is_some_and(|c| c.status == ToolCallStatus::Completed)
    })
    .await;
    let calls = h.handle.tool_calls();
    assert_eq!(calls.len(), 1, "same id updates, never duplicates");
    assert_eq!(calls[0].category.as_deref(), Some("search"));
    assert_eq!(calls[0].content.as_deref(), Some("3 results"));
}

#[tokio::test]
async fn test_new_turn_clears_tool_calls() {
    let h = Harness::connected().await;
    h.push(tool_call(ToolCallStatus::Running, None, None)).await;
    wait_until("tool call", || h.handle.tool_calls().len() == 1).await;

    h.control(ControlSignal::ConversationChainStart).await;
    wait_until("cleared", || h.handle.tool_calls().is_empty()).await;
}

// ─── Affinity and expression ──────────────────────────────────────────────────

#[tokio::test]
async fn test_affinity_update_and_milestone() {
    let mut h = Harness::connected().await;
    h.drain();

    h.push(ProtocolEvent::AffinityUpdate {
        affinity: 42,
        level: Some("friend".to_owned()),
    })
    .await;
    h.push(ProtocolEvent::AffinityMilestone {
        milestone: "first-laugh".to_owned(),
        message: Some("You made me laugh!".to_owned()),
    })
    .await;

    wait_until("milestone", || {
        h.handle.affinity().last_milestone.as_deref() == Some("first-laugh")
    })
    .await;
    let affinity = h.handle.affinity();
    assert_eq!(affinity.affinity, 42);
    assert_eq!(affinity.level.as_deref(), Some("friend"));
    assert!(h.drain().contains(&RuntimeEvent::AffinityMilestone {
        milestone: "first-laugh".to_owned(),
        message: Some("You made me laugh!".to_owned()),
    }));
}

#[tokio::test]
async fn test_expression_change_is_published_once() {
    let mut h = Harness::connected().await;
    h.drain();

    for _ in 0..3 {
        h.push(ProtocolEvent::EmotionExpression {
            expression: "smile".to_owned(),
        })
        .await;
    }
    wait_until("expression", || h.handle.expression().as_deref() == Some("smile")).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let changes = h
        .drain()
        .into_iter()
        .filter(|e| matches!(e, RuntimeEvent::ExpressionChanged { .. }))
        .count();
    assert_eq!(changes, 1);
}

// ─── Errors and unknown input ─────────────────────────────────────────────────

#[tokio::test]
async fn test_gateway_error_resets_turn() {
    let mut h = Harness::connected().await;
    h.handle.send_message("Hello").await.unwrap();
    h.drain();

    h.push(ProtocolEvent::Error {
        message: "model overloaded".to_owned(),
    })
    .await;

    wait_until("idle", || h.handle.ai_state() == AiState::Idle).await;
    assert_eq!(h.handle.last_error().as_deref(), Some("model overloaded"));
    assert!(h.drain().contains(&RuntimeEvent::GatewayError {
        message: "model overloaded".to_owned()
    }));
}

#[tokio::test]
async fn test_unknown_events_are_ignored() {
    let h = Harness::connected().await;
    let event: ProtocolEvent =
        serde_json::from_str(r#"{"type":"confetti","amount":9000}"#).unwrap();
    assert_eq!(event, ProtocolEvent::Unknown);

    h.push(event).await;
    h.push(ProtocolEvent::Control {
        signal: "dance".to_owned(),
    })
    .await;
    h.stream("Still fine.").await;

    wait_until("later events still routed", || {
        h.handle.subtitle() == "Still fine."
    })
    .await;
    assert_eq!(h.handle.ai_state(), AiState::Idle);
    assert!(!h.handle.is_microphone_active());
}

// ─── Microphone ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_voice_input_is_sent_as_transcript() {
    let h = Harness::connected().await;
    h.control(ControlSignal::StartMic).await;
    wait_until("mic on", || h.handle.is_microphone_active()).await;

    h.recognizer.hear("turn on the lights");
    let outcome = h.handle.finish_voice_input().await.unwrap();

    assert_eq!(outcome, SendOutcome::Sent);
    assert!(!h.handle.is_microphone_active());
    assert_eq!(h.gateway.sent_texts(), vec!["turn on the lights"]);
    assert_eq!(h.handle.messages()[0].content, "turn on the lights");
}

#[tokio::test]
async fn test_stop_mic_discards_transcript() {
    let h = Harness::connected().await;
    h.control(ControlSignal::StartMic).await;
    wait_until("mic on", || h.handle.is_microphone_active()).await;
    h.recognizer.hear("never mind");

    h.control(ControlSignal::StopMic).await;
    wait_until("mic off", || !h.handle.is_microphone_active()).await;

    let outcome = h.handle.finish_voice_input().await.unwrap();
    assert_eq!(outcome, SendOutcome::Ignored);
    assert!(h.gateway.sent().is_empty());
}
