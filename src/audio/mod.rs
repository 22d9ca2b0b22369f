//! Hand-off point between synthesis and playback.
//!
//! The queue itself (decoding, playback, lip-sync) lives outside this crate;
//! the orchestrator only enqueues finished sentences, flushes on interrupt
//! and asks whether anything is still waiting to play.

use crate::tts::WordTiming;
use bytes::Bytes;

/// One synthesized sentence ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTask {
    /// The sentence this audio speaks, for subtitles.
    pub sentence: String,
    /// Encoded audio payload.
    pub audio: Bytes,
    /// Word timings for lip-sync, when the synthesizer provides them.
    pub timing: Vec<WordTiming>,
    /// Expression the avatar should wear while this plays.
    pub expression: Option<String>,
    /// Synthesis generation the task was produced under.
    pub generation: u64,
}

/// Playback queue contract.
///
/// Methods are never called while session state is locked, so an
/// implementation may call [`crate::SessionHandle::on_audio_drained`] from
/// inside them.
pub trait AudioTaskQueue: Send + Sync {
    /// Append a task; tasks play strictly in insertion order.
    fn add_task(&self, task: AudioTask);

    /// Drop everything queued and stop the current playback.
    fn clear_queue(&self);

    /// Whether anything is queued or playing.
    fn has_task(&self) -> bool;
}
