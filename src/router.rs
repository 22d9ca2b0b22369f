//! Routes adapted protocol events to the state that owns them.
//!
//! Stateless: every event updates exactly its owning piece of session state
//! and is otherwise forgotten. Any event counts as protocol activity for the
//! inactivity watchdog.

use crate::orchestrator::SessionContext;
use crate::protocol::{ControlSignal, ProtocolEvent};
use crate::runtime::RuntimeEvent;
use crate::session::{ChatMessage, ChatRole};
use crate::state::{AiTrigger, ToolCallRecord};
use tracing::{debug, info, warn};

/// Borrowed dispatcher over the session context.
pub(crate) struct MessageRouter<'a> {
    ctx: &'a SessionContext,
}

impl<'a> MessageRouter<'a> {
    pub fn new(ctx: &'a SessionContext) -> Self {
        Self { ctx }
    }

    /// Handle one event.
    pub async fn handle(&self, event: ProtocolEvent) {
        debug!(kind = event.kind(), "protocol event");
        self.ctx.update(|u| u.touch());
        match event {
            ProtocolEvent::Control { signal } => match ControlSignal::parse(&signal) {
                Some(signal) => self.on_control(signal).await,
                None => debug!(%signal, "ignoring unknown control signal"),
            },
            ProtocolEvent::StreamingText { text } => self.on_streaming_text(&text),
            ProtocolEvent::MessageComplete { text, message_id } => {
                self.on_message_complete(text, message_id);
            }
            ProtocolEvent::Error { message } => {
                warn!(%message, "gateway reported an error");
                self.ctx.update(|u| {
                    u.clear_pending_turn();
                    u.state.pending_new_chat = false;
                    u.state.last_error = Some(message.clone());
                    u.trigger(AiTrigger::Reset);
                    u.emit(RuntimeEvent::GatewayError { message });
                });
            }
            ProtocolEvent::ToolCallStatus {
                id,
                name,
                category,
                status,
                content,
            } => {
                debug!(%id, %name, ?status, "tool call");
                self.ctx.update(|u| {
                    let record = u.state.upsert_tool_call(ToolCallRecord {
                        id,
                        name,
                        category,
                        status,
                        content,
                    });
                    u.emit(RuntimeEvent::ToolCallUpdated { record });
                });
            }
            ProtocolEvent::AffinityUpdate { affinity, level } => self.ctx.update(|u| {
                u.state.affinity.affinity = affinity;
                if level.is_some() {
                    u.state.affinity.level = level;
                }
                let affinity = u.state.affinity.clone();
                u.emit(RuntimeEvent::AffinityChanged { affinity });
            }),
            ProtocolEvent::AffinityMilestone { milestone, message } => {
                info!(%milestone, "affinity milestone");
                self.ctx.update(|u| {
                    u.state.affinity.last_milestone = Some(milestone.clone());
                    u.emit(RuntimeEvent::AffinityMilestone { milestone, message });
                });
            }
            ProtocolEvent::EmotionExpression { expression } => {
                let expression = Some(expression).filter(|e| !e.trim().is_empty());
                if self.ctx.pipeline.expression() != expression {
                    self.ctx.pipeline.set_expression(expression.clone());
                    self.ctx.emit(RuntimeEvent::ExpressionChanged { expression });
                }
            }
            ProtocolEvent::Unknown => debug!("ignoring unknown protocol event"),
        }
    }

    async fn on_control(&self, signal: ControlSignal) {
        match signal {
            ControlSignal::StartMic => match self.ctx.recognizer.start().await {
                Ok(()) => self.ctx.update(|u| u.set_microphone(true)),
                Err(e) => warn!(error = %e, "failed to start microphone"),
            },
            ControlSignal::StopMic => {
                let discarded = self.ctx.recognizer.stop().await;
                if !discarded.is_empty() {
                    debug!(chars = discarded.len(), "discarding transcript on stop-mic");
                }
                self.ctx.update(|u| u.set_microphone(false));
            }
            ControlSignal::ConversationChainStart => {
                debug!("conversation chain started");
                self.ctx.flush_output();
                self.ctx.update(|u| {
                    u.reset_turn();
                    u.state.pending_new_chat = false;
                    u.trigger(AiTrigger::TurnStarted);
                });
            }
            ControlSignal::ConversationChainEnd => {
                let audio_pending = self.ctx.audio.has_task() || self.ctx.pipeline.has_pending();
                debug!(audio_pending, "conversation chain ended");
                self.ctx.update(|u| {
                    u.state.turn_ended = true;
                    let trigger = AiTrigger::TurnEnded {
                        audio_pending,
                        new_chat_pending: u.state.pending_new_chat,
                    };
                    u.trigger(trigger);
                });
            }
        }
    }

    fn on_streaming_text(&self, text: &str) {
        self.ctx.update(|u| u.set_subtitle(text));
        if self.ctx.config.tts.enabled {
            self.ctx.pipeline.on_streaming_text(text);
        }
    }

    fn on_message_complete(&self, text: String, message_id: Option<String>) {
        if self.ctx.config.tts.enabled {
            self.ctx
                .pipeline
                .finish_turn(&text, self.ctx.config.tts.flush_trailing_fragment);
        }
        self.ctx.update(|u| u.set_subtitle(&text));
        if text.trim().is_empty() {
            return;
        }
        let mut message = ChatMessage::new(ChatRole::Assistant, text);
        if let Some(id) = message_id {
            message.id = id;
        }
        let message = self.ctx.sessions.append_message(message);
        self.ctx.emit(RuntimeEvent::MessageAppended { message });
    }
}
