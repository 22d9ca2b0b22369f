//! Integration test binary.
//!
//! All integration tests are compiled into a single binary (one link step)
//! with a shared `helpers` module. Each submodule drives a real
//! `SessionOrchestrator` through scripted collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]


mod connection_recovery;
mod protocol_events;
mod send_flow;
mod session_switching;
