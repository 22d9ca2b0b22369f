//! Microphone speech recognition contract.

use async_trait::async_trait;

/// Streaming speech recognizer driven by `start-mic` / `stop-mic`.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Begin capturing and transcribing.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stop capturing and return the transcript harvested so far.
    async fn stop(&self) -> String;

    /// Whether capture is active.
    fn is_listening(&self) -> bool;
}

/// Recognizer used when no microphone is available; never listens.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRecognizer;

#[async_trait]
impl SpeechRecognizer for DisabledRecognizer {
    async fn start(&self) -> anyhow::Result<()> {
        anyhow::bail!("speech recognition is not available")
    }

    async fn stop(&self) -> String {
        String::new()
    }

    fn is_listening(&self) -> bool {
        false
    }
}
