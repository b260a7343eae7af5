//! Error types for the attune pipeline.

/// Top-level error type for the voice conversation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// Voice activity detection error.
    #[error("VAD error: {0}")]
    Vad(String),

    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Language model inference error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// Text-to-speech synthesis error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// A speech or text emotion detector failed on its input.
    ///
    /// The orchestrator treats this as advisory and substitutes a neutral
    /// sample instead of aborting the turn.
    #[error("emotion detection error: {0}")]
    Detection(String),

    /// A model factory failed to materialize a slot.
    #[error("failed to load model '{model}': {reason}")]
    ModelLoad {
        /// Slot name (`stt`, `llm`, ...).
        model: String,
        /// Factory-provided failure description.
        reason: String,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Pipeline coordination error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpeechError {
    /// Build a [`SpeechError::ModelLoad`] for the given slot name.
    pub fn model_load(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelLoad {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors raised by an emotion detector.
    pub fn is_detection(&self) -> bool {
        matches!(self, Self::Detection(_))
    }

    /// Returns `true` for model factory failures.
    pub fn is_model_load(&self) -> bool {
        matches!(self, Self::ModelLoad { .. })
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SpeechError>;
