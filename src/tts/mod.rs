//! Text-to-speech capability.
//!
//! Synthesis is conditioned on a free-form voice directive (for example
//! "A warm, gentle voice with compassion") chosen per turn from the fused
//! emotion.

use crate::error::Result;
use crate::pipeline::messages::SynthesizedAudio;

/// Renders text to audio in the style described by a voice directive.
pub trait SpeechSynthesizer: Send + Sync {
    /// Empty `samples` in the result means synthesis produced nothing; the
    /// turn ends early without being treated as fatal.
    ///
    /// # Errors
    ///
    /// Returns [`SpeechError::Tts`](crate::error::SpeechError::Tts) if the
    /// engine fails.
    fn synthesize(&self, text: &str, voice_directive: &str) -> Result<SynthesizedAudio>;
}
