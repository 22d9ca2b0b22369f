//! Connection lifecycle on top of a [`GatewayTransport`].
//!
//! Collapses the transport's fine-grained states into [`ConnectionState`],
//! publishes transitions, and raises the one-time notifications the UI cares
//! about: disconnected (only when leaving `Open`), reconnected, and gave up.

use crate::error::{Result, SessionError};
use crate::gateway::transport::{ConnectOptions, GatewayTransport, TransportSignal, TransportState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

/// Capacity of the connection event broadcast.
const CONNECTION_EVENT_CAPACITY: usize = 32;

/// Coarse connection state consumed by the rest of the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
}

impl From<TransportState> for ConnectionState {
    fn from(state: TransportState) -> Self {
        match state {
            TransportState::Connecting
            | TransportState::Handshaking
            | TransportState::Reconnecting => Self::Connecting,
            TransportState::Connected => Self::Open,
            TransportState::Disconnected => Self::Closed,
        }
    }
}

/// Notifications derived from transport signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The coarse state changed.
    StateChanged(ConnectionState),
    /// An open connection was lost.
    Disconnected,
    /// A broken connection was re-established (never fired for the first connect).
    Reconnected,
    /// The transport stopped retrying.
    GaveUp { attempts: u32 },
}

/// Owns the observable connection state for one orchestrator.
pub struct ConnectionManager {
    transport: Arc<dyn GatewayTransport>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionManager {
    /// Wrap a transport. Starts `Closed`.
    pub fn new(transport: Arc<dyn GatewayTransport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let (events_tx, _) = broadcast::channel(CONNECTION_EVENT_CAPACITY);
        Self {
            transport,
            state_tx,
            events_tx,
        }
    }

    /// Current coarse state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch the coarse state.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to connection notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    /// Subscribe to the raw transport signals this manager interprets.
    #[must_use]
    pub fn transport_signals(&self) -> broadcast::Receiver<TransportSignal> {
        self.transport.subscribe()
    }

    /// Open the connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`] if the transport fails to connect;
    /// the state is left `Closed` in that case.
    pub async fn connect(&self, options: &ConnectOptions) -> Result<()> {
        info!(url = %options.url, agent = %options.agent_id, "connecting to gateway");
        self.observe(TransportSignal::State(TransportState::Connecting));
        match self.transport.connect(options).await {
            Ok(()) => {
                self.observe(TransportSignal::State(TransportState::Connected));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "gateway connect failed");
                self.observe(TransportSignal::State(TransportState::Disconnected));
                Err(SessionError::Transport(format!("connect failed: {e}")))
            }
        }
    }

    /// Close the connection.
    pub async fn disconnect(&self) -> Result<()> {
        let result = self.transport.disconnect().await;
        self.observe(TransportSignal::State(TransportState::Disconnected));
        result.map_err(|e| SessionError::Transport(format!("disconnect failed: {e}")))
    }

    /// Manually retry now, bypassing the transport's backoff.
    pub async fn reconnect(&self) -> Result<()> {
        info!("manual reconnect requested");
        self.transport
            .retry_now()
            .await
            .map_err(|e| SessionError::Transport(format!("reconnect failed: {e}")))
    }

    /// Interpret one transport signal, update state, and publish the
    /// resulting notifications. Returns them so the caller can react in order.
    pub fn observe(&self, signal: TransportSignal) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        match signal {
            TransportSignal::State(raw) => self.apply_state(raw.into(), &mut events),
            TransportSignal::Reconnected => {
                self.apply_state(ConnectionState::Open, &mut events);
                info!("gateway connection re-established");
                events.push(ConnectionEvent::Reconnected);
            }
            TransportSignal::GaveUp { attempts } => {
                self.apply_state(ConnectionState::Closed, &mut events);
                warn!(attempts, "gateway reconnect gave up");
                events.push(ConnectionEvent::GaveUp { attempts });
            }
        }
        for event in &events {
            let _ = self.events_tx.send(*event);
        }
        events
    }

    fn apply_state(&self, next: ConnectionState, events: &mut Vec<ConnectionEvent>) {
        let previous = self.state();
        if previous == next {
            return;
        }
        self.state_tx.send_replace(next);
        events.push(ConnectionEvent::StateChanged(next));
        if previous == ConnectionState::Open {
            warn!(state = ?next, "gateway connection lost");
            events.push(ConnectionEvent::Disconnected);
        }
    }
}
