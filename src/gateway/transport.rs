//! Contracts for the Gateway transport and protocol adapter.
//!
//! The transport owns the socket, the handshake and the reconnect policy; the
//! adapter turns raw frames into [`crate::protocol::ProtocolEvent`]s. Neither
//! is implemented here, the orchestrator only depends on these seams.

use crate::config::GatewayConfig;
use crate::session::{ChatMessage, SessionKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Fine-grained transport states reported by the reconnect state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    Connecting,
    Handshaking,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Signals published by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The transport moved to a new state.
    State(TransportState),
    /// A previously established connection broke and has been re-established.
    Reconnected,
    /// The reconnect policy is exhausted; no further automatic attempts.
    GaveUp {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

/// Parameters for opening a Gateway connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub url: String,
    pub agent_id: String,
    pub client_name: String,
    /// Bearer token for authenticated identities.
    pub token: Option<String>,
}

impl ConnectOptions {
    /// Build options from configuration plus an optional auth token.
    #[must_use]
    pub fn from_config(config: &GatewayConfig, token: Option<String>) -> Self {
        Self {
            url: config.url.clone(),
            agent_id: config.agent_id.clone(),
            client_name: config.client_name.clone(),
            token,
        }
    }
}

/// One row of the backend's session list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: SessionKey,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: usize,
}

/// Gateway transport contract. Reconnect policy lives behind this trait.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Open the connection; resolves once the handshake completes.
    async fn connect(&self, options: &ConnectOptions) -> anyhow::Result<()>;

    /// Close the connection and stop reconnecting.
    async fn disconnect(&self) -> anyhow::Result<()>;

    /// Skip the reconnect backoff and try immediately.
    async fn retry_now(&self) -> anyhow::Result<()>;

    /// Subscribe to state transitions and reconnect signals.
    fn subscribe(&self) -> broadcast::Receiver<TransportSignal>;

    /// Dispatch a user chat message to the given session.
    async fn send_chat(&self, session: &SessionKey, text: &str) -> anyhow::Result<()>;

    /// Abort an in-flight AI run.
    async fn abort_run(&self, run_id: &str) -> anyhow::Result<()>;

    /// Fetch the stored message history for a session.
    async fn get_chat_history(&self, session: &SessionKey) -> anyhow::Result<Vec<ChatMessage>>;

    /// Resolve (and create if needed) a session on the backend; returns the canonical key.
    async fn resolve_session(&self, session: &SessionKey, agent_id: &str)
    -> anyhow::Result<SessionKey>;

    /// List the caller's sessions.
    async fn list_sessions(&self) -> anyhow::Result<Vec<SessionSummary>>;

    /// Delete a session and its history.
    async fn delete_session(&self, session: &SessionKey) -> anyhow::Result<()>;
}

/// Protocol adapter accessor used for aborting the active run.
pub trait ProtocolAdapter: Send + Sync {
    /// Identifier of the run currently streaming, if any.
    fn active_run_id(&self) -> Option<String>;
}
