//! The session orchestrator: one instance per avatar session.
//!
//! [`SessionOrchestrator::run`] owns the event loop. It drains adapted
//! protocol events in order, interprets transport signals, drives the sending
//! and watchdog timers and reacts when the synthesis pipeline goes idle.
//! [`SessionHandle`] is the cloneable upward surface used by the UI.
//!
//! All per-session mutable state sits in one [`SessionState`] behind a std
//! mutex that is only held for synchronous sections, so handlers never observe
//! each other half-way through.

use crate::audio::AudioTaskQueue;
use crate::billing::{BillingClient, BillingGate};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::gateway::{
    ConnectOptions, ConnectionEvent, ConnectionManager, ConnectionState, GatewayTransport,
    ProtocolAdapter, SessionSummary, TransportSignal,
};
use crate::outbound::{OutboundGate, OutboundKind, SendOutcome};
use crate::protocol::ProtocolEvent;
use crate::router::MessageRouter;
use crate::runtime::RuntimeEvent;
use crate::session::{
    ChatMessage, Identity, LocalStore, MemoryLocalStore, SessionKey, SessionManager,
    SwitchOutcome,
};
use crate::state::{AffinityState, AiState, AiTrigger, PendingTurn, SessionState, ToolCallRecord};
use crate::stt::{DisabledRecognizer, SpeechRecognizer};
use crate::tts::{SynthesisPipeline, SynthesisWorker, TtsService};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Notify, broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// External collaborators of one session.
pub struct SessionDeps {
    pub transport: Arc<dyn GatewayTransport>,
    pub adapter: Arc<dyn ProtocolAdapter>,
    pub tts: Arc<dyn TtsService>,
    pub audio: Arc<dyn AudioTaskQueue>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub billing: Option<Arc<dyn BillingClient>>,
    pub store: Arc<dyn LocalStore>,
}

impl SessionDeps {
    /// Required collaborators; no microphone, no billing, in-memory storage.
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        adapter: Arc<dyn ProtocolAdapter>,
        tts: Arc<dyn TtsService>,
        audio: Arc<dyn AudioTaskQueue>,
    ) -> Self {
        Self {
            transport,
            adapter,
            tts,
            audio,
            recognizer: Arc::new(DisabledRecognizer),
            billing: None,
            store: Arc::new(MemoryLocalStore::default()),
        }
    }

    /// Use a speech recognizer for `start-mic` / `stop-mic`.
    #[must_use]
    pub fn with_recognizer(mut self, recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }

    /// Gate authenticated sends through a billing client.
    #[must_use]
    pub fn with_billing(mut self, billing: Arc<dyn BillingClient>) -> Self {
        self.billing = Some(billing);
        self
    }

    /// Persist identities, counters and the active session in `store`.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = store;
        self
    }
}

/// Mutation scope over [`SessionState`]. Events raised inside are published
/// in order once the scope ends, while the state lock is still held.
pub(crate) struct Update<'a> {
    pub state: &'a mut SessionState,
    events: Vec<RuntimeEvent>,
    config: &'a SessionConfig,
    now: Instant,
}

impl Update<'_> {
    pub fn emit(&mut self, event: RuntimeEvent) {
        self.events.push(event);
    }

    /// Feed the AI state machine. Re-entering the current state has no effect.
    pub fn trigger(&mut self, trigger: AiTrigger) {
        if matches!(trigger, AiTrigger::TurnStarted | AiTrigger::SendDispatched) {
            self.clear_pending_turn();
        }
        let previous = self.state.ai_state;
        let next = previous.next(trigger);
        if next == previous {
            return;
        }
        debug!(from = previous.as_str(), to = next.as_str(), ?trigger, "ai state");
        self.state.ai_state = next;
        self.state.watchdog_deadline = next
            .is_awaiting_response()
            .then(|| self.now + self.config.timeouts.watchdog_timeout());
        self.emit(RuntimeEvent::AiStateChanged { state: next });
    }

    /// Protocol activity: push the watchdog back if it is armed.
    pub fn touch(&mut self) {
        if self.state.ai_state.is_awaiting_response() {
            self.state.watchdog_deadline = Some(self.now + self.config.timeouts.watchdog_timeout());
        }
    }

    pub fn begin_pending_turn(&mut self, text: &str) {
        let was_sending = self.state.pending_turn.is_some();
        self.state.pending_turn = Some(PendingTurn {
            text: text.to_owned(),
            submitted_at: self.now,
            deadline: self.now + self.config.timeouts.sending_timeout(),
        });
        if !was_sending {
            self.emit(RuntimeEvent::SendingChanged { active: true });
        }
    }

    pub fn clear_pending_turn(&mut self) {
        if self.state.pending_turn.take().is_some() {
            self.emit(RuntimeEvent::SendingChanged { active: false });
        }
    }

    pub fn set_subtitle(&mut self, text: &str) {
        if self.state.subtitle != text {
            self.state.subtitle = text.to_owned();
            self.emit(RuntimeEvent::Subtitle {
                text: text.to_owned(),
            });
        }
    }

    /// Forget the visible state of the current turn.
    pub fn reset_turn(&mut self) {
        self.set_subtitle("");
        self.state.tool_calls.clear();
        self.state.turn_ended = false;
    }

    pub fn set_microphone(&mut self, active: bool) {
        if self.state.microphone_active != active {
            self.state.microphone_active = active;
            self.emit(RuntimeEvent::MicrophoneChanged { active });
        }
    }
}

/// Everything the router, the outbound gate and the loop share.
pub(crate) struct SessionContext {
    pub config: SessionConfig,
    state: Mutex<SessionState>,
    pub sessions: SessionManager,
    pub connection: ConnectionManager,
    pub transport: Arc<dyn GatewayTransport>,
    pub adapter: Arc<dyn ProtocolAdapter>,
    pub pipeline: SynthesisPipeline,
    pub audio: Arc<dyn AudioTaskQueue>,
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub billing: BillingGate,
    pub events: broadcast::Sender<RuntimeEvent>,
    /// Wakes the loop when a timer deadline moved.
    timers: Notify,
    /// Id of the most recent session switch.
    latest_switch: AtomicU64,
}

impl SessionContext {
    /// Run `f` under the state lock and publish what it emitted.
    pub fn update<R>(&self, f: impl FnOnce(&mut Update<'_>) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = guard.next_deadline();
        let mut update = Update {
            state: &mut *guard,
            events: Vec::new(),
            config: &self.config,
            now: Instant::now(),
        };
        let result = f(&mut update);
        let events = std::mem::take(&mut update.events);
        for event in events {
            let _ = self.events.send(event);
        }
        if guard.next_deadline() != before {
            self.timers.notify_one();
        }
        result
    }

    /// Read-only view of the state.
    pub fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.events.send(event);
    }

    /// Publish the local message list for the active session.
    pub fn publish_messages(&self, messages: Vec<ChatMessage>) {
        if let Some(session) = self.sessions.active_key() {
            self.emit(RuntimeEvent::MessagesReplaced { session, messages });
        }
    }

    /// Drop queued and in-flight synthesis and flush playback. Called without
    /// the state lock, so the audio queue may call back into the session.
    pub fn flush_output(&self) {
        self.pipeline.invalidate();
        self.pipeline.reset_turn();
        self.audio.clear_queue();
    }

    /// The audio queue (or the pipeline feeding it) went quiet.
    fn on_output_drained(&self) {
        if self.pipeline.has_pending() || self.audio.has_task() {
            return;
        }
        self.update(|u| {
            let trigger = AiTrigger::AudioDrained {
                turn_ended: u.state.turn_ended,
                new_chat_pending: u.state.pending_new_chat,
            };
            u.trigger(trigger);
        });
    }

    fn on_deadline(&self) {
        self.update(|u| {
            let now = u.now;
            if u.state.pending_turn.as_ref().is_some_and(|p| p.deadline <= now) {
                warn!("no acknowledgement for the last message, clearing sending state");
                u.clear_pending_turn();
            }
            if u.state.watchdog_deadline.is_some_and(|d| d <= now) {
                warn!(state = u.state.ai_state.as_str(), "inactivity watchdog fired");
                u.state.watchdog_deadline = None;
                u.set_subtitle("");
                u.trigger(AiTrigger::Reset);
                u.emit(RuntimeEvent::WatchdogFired);
            }
        });
    }

    fn on_connection_event(self: &Arc<Self>, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                self.emit(RuntimeEvent::ConnectionChanged { state });
            }
            ConnectionEvent::Disconnected => {
                self.update(|u| u.clear_pending_turn());
                self.emit(RuntimeEvent::Disconnected);
            }
            ConnectionEvent::Reconnected => self.recover_after_reconnect(),
            ConnectionEvent::GaveUp { attempts } => {
                self.emit(RuntimeEvent::ReconnectGaveUp { attempts });
            }
        }
    }

    /// Local reset first, then a background re-resolution and history refetch.
    fn recover_after_reconnect(self: &Arc<Self>) {
        info!("recovering session after reconnect");
        self.flush_output();
        self.update(|u| {
            u.reset_turn();
            u.clear_pending_turn();
            u.state.pending_new_chat = false;
            u.trigger(AiTrigger::Reset);
            u.emit(RuntimeEvent::Reconnected);
        });
        let ctx = Arc::clone(self);
        tokio::spawn(async move { ctx.resync_session().await });
    }

    /// Re-resolve the active session and restore its history. Best effort.
    async fn resync_session(&self) {
        let before = self.sessions.active_key();
        match self.sessions.resolve_active_session().await {
            Ok(key) => {
                if before.as_ref() != Some(&key) {
                    self.emit(RuntimeEvent::ActiveSessionChanged { session: key });
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to resolve active session");
                return;
            }
        }
        match self.sessions.restore_history().await {
            Ok(Some(messages)) => self.publish_messages(messages),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to restore history"),
        }
    }
}

/// Cloneable control surface for one session.
#[derive(Clone)]
pub struct SessionHandle {
    ctx: Arc<SessionContext>,
    cancel: CancellationToken,
}

/// Owns the event loop; consumed by [`SessionOrchestrator::run`].
pub struct SessionOrchestrator {
    ctx: Arc<SessionContext>,
    protocol_rx: mpsc::Receiver<ProtocolEvent>,
    transport_rx: broadcast::Receiver<TransportSignal>,
    connection_rx: broadcast::Receiver<ConnectionEvent>,
    worker: SynthesisWorker,
    cancel: CancellationToken,
}

impl SessionOrchestrator {
    /// Wire a session. `protocol_rx` carries events from the protocol adapter.
    pub fn new(
        config: SessionConfig,
        deps: SessionDeps,
        protocol_rx: mpsc::Receiver<ProtocolEvent>,
    ) -> (SessionHandle, Self) {
        let (events, _) = broadcast::channel(config.events.capacity.max(1));
        let (pipeline, worker) = SynthesisPipeline::new(
            Arc::clone(&deps.tts),
            Arc::clone(&deps.audio),
            events.clone(),
            config.tts.min_sentence_chars,
        );
        let connection = ConnectionManager::new(Arc::clone(&deps.transport));
        let transport_rx = connection.transport_signals();
        let connection_rx = connection.subscribe();
        let sessions = SessionManager::new(
            Arc::clone(&deps.transport),
            deps.store,
            config.gateway.agent_id.clone(),
            config.history.max_messages,
        );
        let billing = if config.billing.enabled {
            BillingGate::new(deps.billing)
        } else {
            BillingGate::default()
        };
        let ctx = Arc::new(SessionContext {
            config,
            state: Mutex::new(SessionState::new()),
            sessions,
            connection,
            transport: deps.transport,
            adapter: deps.adapter,
            pipeline,
            audio: deps.audio,
            recognizer: deps.recognizer,
            billing,
            events,
            timers: Notify::new(),
            latest_switch: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();
        let handle = SessionHandle {
            ctx: Arc::clone(&ctx),
            cancel: cancel.clone(),
        };
        let orchestrator = Self {
            ctx,
            protocol_rx,
            transport_rx,
            connection_rx,
            worker,
            cancel,
        };
        (handle, orchestrator)
    }

    /// Run until [`SessionHandle::shutdown`] or the protocol stream closes.
    pub async fn run(self) {
        let Self {
            ctx,
            mut protocol_rx,
            mut transport_rx,
            mut connection_rx,
            worker,
            cancel,
        } = self;
        let worker = tokio::spawn(worker.run(cancel.child_token()));
        let mut transport_open = true;
        info!("session orchestrator started");

        loop {
            let deadline = ctx.read(SessionState::next_deadline);
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = connection_rx.recv() => match event {
                    Ok(event) => ctx.on_connection_event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "connection events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                signal = transport_rx.recv(), if transport_open => match signal {
                    Ok(signal) => {
                        ctx.connection.observe(signal);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "transport signals lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("transport signal stream closed");
                        transport_open = false;
                    }
                },
                event = protocol_rx.recv() => match event {
                    Some(event) => MessageRouter::new(&ctx).handle(event).await,
                    None => {
                        info!("protocol event stream closed");
                        break;
                    }
                },
                () = sleep_until(deadline) => ctx.on_deadline(),
                () = ctx.timers.notified() => {}
                () = ctx.pipeline.idle() => ctx.on_output_drained(),
            }
        }

        cancel.cancel();
        if let Err(e) = worker.await {
            warn!(error = %e, "synthesis worker ended abnormally");
        }
        info!("session orchestrator stopped");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SessionHandle {
    /// Open the Gateway connection, then resolve the active session and
    /// restore its history.
    pub async fn connect(&self, token: Option<String>) -> Result<()> {
        let options = ConnectOptions::from_config(&self.ctx.config.gateway, token);
        let timeout = self.ctx.config.gateway.connect_timeout();
        tokio::time::timeout(timeout, self.ctx.connection.connect(&options))
            .await
            .map_err(|_| SessionError::Transport(format!("connect timed out after {timeout:?}")))??;
        self.ctx.resync_session().await;
        Ok(())
    }

    /// Close the connection.
    pub async fn disconnect(&self) -> Result<()> {
        self.ctx.connection.disconnect().await
    }

    /// Retry immediately after the transport gave up.
    pub async fn reconnect(&self) -> Result<()> {
        self.ctx.connection.reconnect().await
    }

    /// Send typed text.
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome> {
        OutboundGate::new(&self.ctx)
            .send(OutboundKind::TextInput, text)
            .await
    }

    /// Send a proactive nudge on the user's behalf.
    pub async fn send_nudge(&self, text: &str) -> Result<SendOutcome> {
        OutboundGate::new(&self.ctx)
            .send(OutboundKind::ProactiveNudge, text)
            .await
    }

    /// Stop listening and send what the recognizer heard.
    pub async fn finish_voice_input(&self) -> Result<SendOutcome> {
        let transcript = self.ctx.recognizer.stop().await;
        self.ctx.update(|u| u.set_microphone(false));
        OutboundGate::new(&self.ctx)
            .send(OutboundKind::VoiceTranscript, &transcript)
            .await
    }

    /// Stop the AI mid-turn: discard pending speech and abort the run.
    pub async fn interrupt(&self) {
        let ctx = &self.ctx;
        let generation = ctx.pipeline.invalidate();
        ctx.pipeline.reset_turn();
        ctx.audio.clear_queue();
        ctx.update(|u| u.trigger(AiTrigger::Interrupt));
        info!(generation, "interrupted");

        if let Some(run_id) = ctx.adapter.active_run_id() {
            if let Err(e) = ctx.transport.abort_run(&run_id).await {
                warn!(run_id = %run_id, error = %e, "abort failed");
            }
        }
        // Only settle if nothing newer (a send, a new turn) happened meanwhile.
        if ctx.pipeline.generation() == generation {
            ctx.update(|u| u.trigger(AiTrigger::InterruptSettled));
        }
    }

    /// The audio queue finished playing everything it had.
    pub fn on_audio_drained(&self) {
        self.ctx.on_output_drained();
    }

    /// Change identity; when connected the new identity's session is resolved
    /// and its history fetched.
    pub async fn set_identity(&self, identity: Identity) -> Result<SessionKey> {
        let key = self.ctx.sessions.set_identity(identity)?;
        self.ctx.emit(RuntimeEvent::ActiveSessionChanged {
            session: key.clone(),
        });
        self.ctx.publish_messages(Vec::new());
        if self.ctx.connection.state() == ConnectionState::Open {
            self.ctx.resync_session().await;
            return Ok(self.ctx.sessions.active_key().unwrap_or(key));
        }
        Ok(key)
    }

    /// Switch to another session and load its history.
    ///
    /// Loading ends when this switch applies, or when it is superseded or
    /// fails and no newer switch has started since.
    pub async fn switch_session(&self, key: SessionKey) -> Result<SwitchOutcome> {
        let id = self.ctx.latest_switch.fetch_add(1, Ordering::SeqCst) + 1;
        self.ctx.update(|u| u.trigger(AiTrigger::LoadingStarted));
        self.ctx.emit(RuntimeEvent::ActiveSessionChanged {
            session: key.clone(),
        });
        let outcome = self.ctx.sessions.switch_to(key).await;
        let newest = self.ctx.latest_switch.load(Ordering::SeqCst) == id;
        match &outcome {
            Ok(SwitchOutcome::Applied(messages)) => {
                self.ctx.publish_messages(messages.clone());
                self.ctx.update(|u| u.trigger(AiTrigger::LoadingFinished));
            }
            Ok(SwitchOutcome::Superseded) => {
                debug!(newest, "session switch superseded");
                if newest {
                    self.ctx.update(|u| u.trigger(AiTrigger::LoadingFinished));
                }
            }
            Err(e) => {
                warn!(error = %e, "session switch failed");
                if newest {
                    self.ctx.update(|u| u.trigger(AiTrigger::LoadingFinished));
                }
            }
        }
        outcome
    }

    /// Start a fresh conversation.
    pub async fn create_session(&self) -> Result<SessionKey> {
        let key = self.ctx.sessions.create_new().await?;
        self.ctx.emit(RuntimeEvent::ActiveSessionChanged {
            session: key.clone(),
        });
        self.ctx.publish_messages(Vec::new());
        Ok(key)
    }

    /// Delete a session; deleting the active one starts a fresh conversation.
    pub async fn delete_session(&self, key: &SessionKey) -> Result<Option<SessionKey>> {
        let replacement = self.ctx.sessions.delete(key).await?;
        if let Some(session) = &replacement {
            self.ctx.emit(RuntimeEvent::ActiveSessionChanged {
                session: session.clone(),
            });
            self.ctx.publish_messages(Vec::new());
        }
        Ok(replacement)
    }

    /// The caller's sessions.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.ctx.sessions.list_sessions().await
    }

    /// Re-fetch history for the active session.
    pub async fn restore_history(&self) -> Result<Option<Vec<ChatMessage>>> {
        let restored = self.ctx.sessions.restore_history().await?;
        if let Some(messages) = &restored {
            self.ctx.publish_messages(messages.clone());
        }
        Ok(restored)
    }

    /// Subscribe to runtime events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.ctx.events.subscribe()
    }

    /// Runtime events as a stream.
    #[must_use]
    pub fn events(&self) -> BroadcastStream<RuntimeEvent> {
        BroadcastStream::new(self.subscribe())
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.ctx.connection.state()
    }

    #[must_use]
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.connection.watch_state()
    }

    #[must_use]
    pub fn ai_state(&self) -> AiState {
        self.ctx.read(|s| s.ai_state)
    }

    /// Whether a sent message is still awaiting acknowledgement.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.ctx.read(|s| s.pending_turn.is_some())
    }

    #[must_use]
    pub fn subtitle(&self) -> String {
        self.ctx.read(|s| s.subtitle.clone())
    }

    #[must_use]
    pub fn tool_calls(&self) -> Vec<ToolCallRecord> {
        self.ctx.read(|s| s.tool_calls.clone())
    }

    #[must_use]
    pub fn affinity(&self) -> AffinityState {
        self.ctx.read(|s| s.affinity.clone())
    }

    #[must_use]
    pub fn is_microphone_active(&self) -> bool {
        self.ctx.read(|s| s.microphone_active)
    }

    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.ctx.read(|s| s.last_error.clone())
    }

    #[must_use]
    pub fn expression(&self) -> Option<String> {
        self.ctx.pipeline.expression()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.ctx.sessions.messages()
    }

    #[must_use]
    pub fn active_session(&self) -> Option<SessionKey> {
        self.ctx.sessions.active_key()
    }

    #[must_use]
    pub fn identity(&self) -> Identity {
        self.ctx.sessions.identity()
    }

    /// Current synthesis generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.ctx.pipeline.generation()
    }

    /// Stop the event loop and the synthesis worker.
    pub fn shutdown(&self) {
        info!("session shutdown requested");
        self.cancel.cancel();
    }
}
