//! Outbound gate for every user-initiated send.
//!
//! Order matters: the guest limit and the billing check run before anything
//! visible changes, so a blocked message leaves no trace except the paywall.
//! After that the turn is reset, the message is shown optimistically and
//! dispatched; a failed dispatch undoes every optimistic step.

use crate::billing::{BillingVerdict, PaywallReason};
use crate::error::{Result, SessionError};
use crate::gateway::ConnectionState;
use crate::orchestrator::SessionContext;
use crate::runtime::RuntimeEvent;
use crate::session::{ChatMessage, ChatRole};
use crate::state::AiTrigger;
use tracing::{info, warn};

/// Where an outbound message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    /// Typed by the user.
    TextInput,
    /// Harvested from the speech recognizer.
    VoiceTranscript,
    /// Sent on the user's behalf to restart a stalled conversation.
    ProactiveNudge,
}

impl OutboundKind {
    /// Whether the message is shown in the local list and counts toward the guest limit.
    #[must_use]
    pub fn is_user_authored(self) -> bool {
        !matches!(self, Self::ProactiveNudge)
    }
}

/// Result of a send that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Dispatched to the gateway.
    Sent,
    /// Stopped before dispatch; the paywall was opened.
    Blocked(PaywallReason),
    /// Nothing to send.
    Ignored,
}

/// Borrowed gate over the session context.
pub(crate) struct OutboundGate<'a> {
    ctx: &'a SessionContext,
}

impl<'a> OutboundGate<'a> {
    pub fn new(ctx: &'a SessionContext) -> Self {
        Self { ctx }
    }

    /// Send `text` of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] when the dispatch failed; the
    /// optimistic state has been rolled back and `SendFailed` emitted by then.
    pub async fn send(&self, kind: OutboundKind, text: &str) -> Result<SendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Ignored);
        }
        let ctx = self.ctx;
        ctx.update(|u| u.begin_pending_turn(text));

        let identity = ctx.sessions.identity();
        let mut counted = false;
        if identity.is_guest() {
            let used = ctx.sessions.guest_message_count().unwrap_or_else(|e| {
                warn!(error = %e, "failed to read guest counter");
                0
            });
            if used >= ctx.config.guest.message_limit {
                info!(used, limit = ctx.config.guest.message_limit, "guest limit reached");
                self.block(PaywallReason::GuestLimit, None, None);
                return Ok(SendOutcome::Blocked(PaywallReason::GuestLimit));
            }
            if kind.is_user_authored() {
                match ctx.sessions.increment_guest_count() {
                    Ok(_) => counted = true,
                    Err(e) => warn!(error = %e, "failed to persist guest counter"),
                }
            }
        } else if let BillingVerdict::Denied {
            reason,
            message,
            credits_balance,
        } = ctx.billing.check().await
        {
            self.block(reason.clone(), message, credits_balance);
            return Ok(SendOutcome::Blocked(reason));
        }

        // Anything still speaking belongs to the previous turn.
        ctx.flush_output();
        let optimistic = ctx.update(|u| {
            u.reset_turn();
            u.state.pending_new_chat = true;
            u.trigger(AiTrigger::SendDispatched);
            kind.is_user_authored().then(|| {
                let message = ctx
                    .sessions
                    .append_message(ChatMessage::new(ChatRole::User, text));
                u.emit(RuntimeEvent::MessageAppended {
                    message: message.clone(),
                });
                message
            })
        });

        match self.dispatch(text).await {
            Ok(()) => {
                info!(?kind, chars = text.len(), "message sent");
                Ok(SendOutcome::Sent)
            }
            Err(e) => {
                warn!(?kind, error = %e, "send failed, rolling back");
                if counted {
                    if let Err(e) = ctx.sessions.rollback_guest_count() {
                        warn!(error = %e, "failed to roll back guest counter");
                    }
                }
                let reason = e.to_string();
                ctx.update(|u| {
                    if let Some(message) = &optimistic {
                        if ctx.sessions.remove_message(&message.id) {
                            u.emit(RuntimeEvent::MessageRemoved {
                                id: message.id.clone(),
                            });
                        }
                    }
                    u.state.pending_new_chat = false;
                    u.clear_pending_turn();
                    u.trigger(AiTrigger::Reset);
                    u.emit(RuntimeEvent::SendFailed {
                        text: text.to_owned(),
                        reason: reason.clone(),
                    });
                });
                Err(e)
            }
        }
    }

    async fn dispatch(&self, text: &str) -> Result<()> {
        let ctx = self.ctx;
        if ctx.connection.state() != ConnectionState::Open {
            return Err(SessionError::Transport("not connected".to_owned()));
        }
        let key = match ctx.sessions.active_key() {
            Some(key) => key,
            None => ctx.sessions.local_session_key(&ctx.sessions.identity())?,
        };
        ctx.transport
            .send_chat(&key, text)
            .await
            .map_err(|e| SessionError::Transport(format!("send to {key} failed: {e}")))
    }

    fn block(&self, reason: PaywallReason, message: Option<String>, credits_balance: Option<i64>) {
        self.ctx.update(|u| {
            u.clear_pending_turn();
            u.emit(RuntimeEvent::Paywall {
                reason,
                message,
                credits_balance,
            });
        });
    }
}
