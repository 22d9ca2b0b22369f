//! Text-to-speech contract and the ordered synthesis pipeline.

pub mod pipeline;
pub mod sentences;

pub use pipeline::{SynthesisPipeline, SynthesisWorker};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Timing of one spoken word, relative to the start of the clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start_ms: u32,
    pub end_ms: u32,
}

/// Output of one synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    /// Encoded audio payload.
    pub audio: Bytes,
    /// Word timings, empty when the vendor does not report them.
    pub timing: Vec<WordTiming>,
}

/// Text-to-speech service.
#[async_trait]
pub trait TtsService: Send + Sync {
    /// Complete sentences present in `full` but not already complete in `prev`.
    fn extract_complete_sentences(&self, prev: &str, full: &str) -> Vec<String> {
        sentences::extract_complete_sentences(prev, full)
    }

    /// Synthesize one sentence. `Ok(None)` means the vendor returned nothing.
    async fn synthesize(&self, sentence: &str) -> anyhow::Result<Option<SynthesizedAudio>>;
}
