//! Speech-to-text capability.
//!
//! The engine itself is an external collaborator loaded into the `stt` slot;
//! the pipeline only sees this trait.

use crate::error::Result;

/// Transcribes mono PCM audio.
pub trait SpeechTranscriber: Send + Sync {
    /// `samples` are mono PCM in `[-1.0, 1.0]`.
    ///
    /// An empty (or whitespace-only) string means nothing was transcribed.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Stt`](crate::error::SpeechError::Stt) if the
    /// engine fails.
    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}
