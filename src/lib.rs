//! Avatar session: the client-side runtime behind a conversational AI avatar.
//!
//! This crate keeps one avatar conversation alive on top of a persistent
//! Gateway connection and makes a multi-service pipeline feel instantaneous:
//! Gateway events → router → subtitles / tool calls / affinity, and streamed
//! text → sentence synthesis → audio queue.
//!
//! # Architecture
//!
//! - **Connection**: [`gateway::ConnectionManager`] collapses transport states
//!   and raises disconnected / reconnected / gave-up notifications
//! - **Routing**: the message router applies each protocol event to the state that owns it
//! - **Synthesis**: [`tts::SynthesisPipeline`] speaks each sentence once, in
//!   order, and drops stale audio after interrupts via a generation counter
//! - **Sending**: [`outbound`] enforces the guest limit and billing, updates the
//!   UI optimistically and rolls back on failure
//! - **Sessions**: [`session::SessionManager`] resolves, switches and restores
//!   sessions without letting a slow fetch overwrite a newer switch
//! - **Orchestration**: [`orchestrator::SessionOrchestrator`] runs the event loop;
//!   [`orchestrator::SessionHandle`] is the upward API
//!
//! The transport, protocol adapter, synthesizer, recognizer and audio queue
//! are collaborators supplied by the host through the traits in this crate.

pub mod audio;
pub mod billing;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod gateway;
pub mod orchestrator;
pub mod outbound;
pub mod protocol;
pub(crate) mod router;
pub mod runtime;
pub mod session;
pub mod state;
pub mod stt;
pub mod tts;


pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use orchestrator::{SessionDeps, SessionHandle, SessionOrchestrator};
pub use outbound::{OutboundKind, SendOutcome};
pub use protocol::ProtocolEvent;
pub use runtime::RuntimeEvent;
pub use state::AiState;
