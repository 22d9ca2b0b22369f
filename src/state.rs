//! Per-session mutable state owned by the orchestrator.
//!
//! [`AiState`] transitions go through [`AiState::next`], a guarded state
//! machine: every trigger maps to exactly one successor, and re-entering the
//! current state is reported as "no change" so side effects run only on real
//! transitions.

use crate::protocol::ToolCallStatus;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Perceived activity of the AI, independent of the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AiState {
    #[default]
    Idle,
    ThinkingSpeaking,
    Loading,
    Interrupted,
}

impl AiState {
    /// Wire/display name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ThinkingSpeaking => "thinking-speaking",
            Self::Loading => "loading",
            Self::Interrupted => "interrupted",
        }
    }

    /// Whether a response is awaited; the inactivity watchdog is armed only here.
    #[must_use]
    pub fn is_awaiting_response(self) -> bool {
        matches!(self, Self::ThinkingSpeaking | Self::Loading)
    }

    /// Successor state for `trigger`.
    #[must_use]
    pub fn next(self, trigger: AiTrigger) -> Self {
        match trigger {
            AiTrigger::TurnStarted | AiTrigger::SendDispatched => Self::ThinkingSpeaking,
            AiTrigger::TurnEnded {
                audio_pending,
                new_chat_pending,
            } => {
                if audio_pending || new_chat_pending {
                    self
                } else {
                    Self::Idle
                }
            }
            AiTrigger::AudioDrained {
                turn_ended,
                new_chat_pending,
            } => {
                if self == Self::ThinkingSpeaking && turn_ended && !new_chat_pending {
                    Self::Idle
                } else {
                    self
                }
            }
            AiTrigger::Interrupt => Self::Interrupted,
            AiTrigger::InterruptSettled => {
                if self == Self::Interrupted {
                    Self::Idle
                } else {
                    self
                }
            }
            AiTrigger::LoadingStarted => {
                if self == Self::Idle {
                    Self::Loading
                } else {
                    self
                }
            }
            AiTrigger::LoadingFinished => {
                if self == Self::Loading {
                    Self::Idle
                } else {
                    self
                }
            }
            AiTrigger::Reset => Self::Idle,
        }
    }
}

/// Inputs to the [`AiState`] machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiTrigger {
    /// The server began a conversation chain.
    TurnStarted,
    /// A user message was dispatched (optimistic busy).
    SendDispatched,
    /// The server ended a conversation chain.
    TurnEnded {
        audio_pending: bool,
        new_chat_pending: bool,
    },
    /// The audio queue finished playing everything it had.
    AudioDrained {
        turn_ended: bool,
        new_chat_pending: bool,
    },
    /// The user interrupted the AI.
    Interrupt,
    /// The abort for an interrupt completed.
    InterruptSettled,
    /// A session switch began loading history.
    LoadingStarted,
    /// A session switch finished loading history.
    LoadingFinished,
    /// Failure, watchdog or reconnect recovery.
    Reset,
}

/// An outbound message awaiting acknowledgement; its presence is the "sending" flag.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    pub text: String,
    pub submitted_at: Instant,
    /// Safety deadline after which the sending flag is cleared regardless.
    pub deadline: Instant,
}

/// State of one tool call, keyed by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    pub status: ToolCallStatus,
    pub content: Option<String>,
}

/// Affinity score and the last milestone reached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinityState {
    pub affinity: i64,
    pub level: Option<String>,
    pub last_milestone: Option<String>,
}

/// Everything the orchestrator mutates while handling events.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub ai_state: AiState,
    pub pending_turn: Option<PendingTurn>,
    /// A new user message went out before the previous turn's end-of-chain arrived.
    pub pending_new_chat: bool,
    /// The server has ended the current chain (audio may still be playing).
    pub turn_ended: bool,
    pub subtitle: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub affinity: AffinityState,
    pub microphone_active: bool,
    pub watchdog_deadline: Option<Instant>,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a tool call in place. Returns the stored record.
    pub fn upsert_tool_call(&mut self, record: ToolCallRecord) -> ToolCallRecord {
        if let Some(existing) = self.tool_calls.iter_mut().find(|r| r.id == record.id) {
            existing.status = record.status;
            if record.content.is_some() {
                existing.content = record.content;
            }
            if record.category.is_some() {
                existing.category = record.category;
            }
            return existing.clone();
        }
        self.tool_calls.push(record.clone());
        record
    }

    /// Earliest pending timer, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        let sending = self.pending_turn.as_ref().map(|p| p.deadline);
        match (sending, self.watchdog_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}
