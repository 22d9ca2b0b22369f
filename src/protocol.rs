//! Adapted protocol events consumed by the message router.
//!
//! The protocol adapter turns raw Gateway frames into these shapes. Event
//! kinds this crate does not know about decode to [`ProtocolEvent::Unknown`]
//! and are ignored, so newer gateways stay compatible.

use serde::{Deserialize, Serialize};

/// A discriminated event from the protocol adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProtocolEvent {
    /// Control signal; see [`ControlSignal`].
    Control { signal: String },
    /// Full response text streamed so far for the current turn.
    StreamingText { text: String },
    /// The assistant finished a message.
    MessageComplete {
        text: String,
        #[serde(default)]
        message_id: Option<String>,
    },
    /// The gateway reported a failure for the current turn.
    Error { message: String },
    /// Status of a tool call made by the AI.
    ToolCallStatus {
        id: String,
        name: String,
        #[serde(default)]
        category: Option<String>,
        status: ToolCallStatus,
        #[serde(default)]
        content: Option<String>,
    },
    /// Affinity score update.
    AffinityUpdate {
        affinity: i64,
        #[serde(default)]
        level: Option<String>,
    },
    /// Affinity milestone reached.
    AffinityMilestone {
        milestone: String,
        #[serde(default)]
        message: Option<String>,
    },
    /// Emotional expression the avatar should wear.
    EmotionExpression { expression: String },
    /// Anything else.
    #[serde(other)]
    Unknown,
}

impl ProtocolEvent {
    /// Stable event kind name, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Control { .. } => "control",
            Self::StreamingText { .. } => "streaming-text",
            Self::MessageComplete { .. } => "message-complete",
            Self::Error { .. } => "error",
            Self::ToolCallStatus { .. } => "tool-call-status",
            Self::AffinityUpdate { .. } => "affinity-update",
            Self::AffinityMilestone { .. } => "affinity-milestone",
            Self::EmotionExpression { .. } => "emotion-expression",
            Self::Unknown => "unknown",
        }
    }
}

/// Control sub-signals carried by [`ProtocolEvent::Control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    StartMic,
    StopMic,
    ConversationChainStart,
    ConversationChainEnd,
}

impl ControlSignal {
    /// Render to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StartMic => "start-mic",
            Self::StopMic => "stop-mic",
            Self::ConversationChainStart => "conversation-chain-start",
            Self::ConversationChainEnd => "conversation-chain-end",
        }
    }

    /// Parse from wire format; unknown signals yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "start-mic" => Some(Self::StartMic),
            "stop-mic" => Some(Self::StopMic),
            "conversation-chain-start" => Some(Self::ConversationChainStart),
            "conversation-chain-end" => Some(Self::ConversationChainEnd),
            _ => None,
        }
    }

    /// Build the protocol event carrying this signal.
    #[must_use]
    pub fn event(self) -> ProtocolEvent {
        ProtocolEvent::Control {
            signal: self.as_str().to_owned(),
        }
    }
}

/// Lifecycle of a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Error,
}
