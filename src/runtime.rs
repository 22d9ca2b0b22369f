//! Runtime events emitted by the orchestrator for UI and observability.
//!
//! This is intentionally lightweight so handlers can emit without blocking;
//! slow subscribers lag and drop rather than stall the session.

use crate::billing::PaywallReason;
use crate::gateway::ConnectionState;
use crate::session::{ChatMessage, SessionKey};
use crate::state::{AffinityState, AiState, ToolCallRecord};
use serde::Serialize;

/// Events that describe what the session is doing "right now".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// Coarse connection state changed.
    ConnectionChanged { state: ConnectionState },
    /// An open connection was lost (fired once per outage).
    Disconnected,
    /// A broken connection was re-established and the session recovered.
    Reconnected,
    /// The transport gave up reconnecting; a manual retry is needed.
    ReconnectGaveUp { attempts: u32 },
    /// AI activity changed.
    AiStateChanged { state: AiState },
    /// The "sending" flag changed.
    SendingChanged { active: bool },
    /// Subtitle text changed (empty = cleared).
    Subtitle { text: String },
    /// The local message list was replaced (history restore, session switch).
    MessagesReplaced {
        session: SessionKey,
        messages: Vec<ChatMessage>,
    },
    /// A message was appended to the local list.
    MessageAppended { message: ChatMessage },
    /// An optimistic message was rolled back.
    MessageRemoved { id: String },
    /// A send failed; `text` is the original input so the UI can restore it.
    SendFailed { text: String, reason: String },
    /// A send was blocked by policy; show the paywall.
    Paywall {
        reason: PaywallReason,
        message: Option<String>,
        credits_balance: Option<i64>,
    },
    /// Some sentences of this turn could not be synthesized (once per turn).
    SynthesisWarning,
    /// A tool call was created or updated.
    ToolCallUpdated { record: ToolCallRecord },
    /// Affinity changed.
    AffinityChanged { affinity: AffinityState },
    /// Affinity milestone reached.
    AffinityMilestone {
        milestone: String,
        message: Option<String>,
    },
    /// The avatar's expression changed.
    ExpressionChanged { expression: Option<String> },
    /// Microphone capture toggled.
    MicrophoneChanged { active: bool },
    /// The gateway reported an error for the current turn.
    GatewayError { message: String },
    /// The inactivity watchdog reset a stuck turn.
    WatchdogFired,
    /// The active session changed.
    ActiveSessionChanged { session: SessionKey },
}
