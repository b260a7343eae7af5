//! Emotion detector capabilities.
//!
//! Implementations wrap an external classifier (or one of the built-in
//! heuristics) and report an [`EmotionSample`]. A detector that cannot score
//! its input returns [`SpeechError::Detection`](crate::error::SpeechError);
//! the orchestrator substitutes [`EmotionSample::neutral_default`] for it.

use super::EmotionSample;
use crate::error::Result;

/// Scores the emotional content of raw speech audio.
pub trait SpeechEmotionDetector: Send + Sync {
    /// `samples` are mono PCM in `[-1.0, 1.0]`.
    fn detect(&self, samples: &[f32], sample_rate: u32) -> Result<EmotionSample>;
}

/// Scores the emotional content of a transcript.
pub trait TextEmotionDetector: Send + Sync {
    fn detect(&self, text: &str) -> Result<EmotionSample>;
}
