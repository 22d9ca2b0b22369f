//! Error types for the avatar session runtime.

/// Top-level error type for the session orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Gateway transport error (connect, send, abort, history fetch).
    #[error("transport error: {0}")]
    Transport(String),

    /// Billing round trip error.
    #[error("billing error: {0}")]
    Billing(String),

    /// Session resolution or switching error.
    #[error("session error: {0}")]
    Session(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Local key/value storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Microphone / speech recognition error.
    #[error("ASR error: {0}")]
    Asr(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SessionError>;
