//! Energy-heuristic speech emotion detector.
//!
//! Peak-normalizes the utterance and buckets its RMS energy: loud speech reads
//! as anger, lively speech as joy, flat quiet speech as sadness. Crude, but it
//! needs no model and never allocates VRAM.

use super::{EmotionCategory, EmotionSample, SpeechEmotionDetector};
use crate::error::Result;
use crate::vad::compute_rms_energy;

const ANGER_RMS: f32 = 0.1;
const JOY_RMS: f32 = 0.05;
const SADNESS_RMS: f32 = 0.02;

/// Built-in prosody speech emotion detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProsodySpeechEmotion;

impl ProsodySpeechEmotion {
    pub fn new() -> Self {
        Self
    }

    /// Classify mono PCM samples. Empty or silent input is neutral.
    pub fn classify(&self, samples: &[f32]) -> EmotionSample {
        let peak = samples
            .iter()
            .filter(|s| s.is_finite())
            .fold(0.0_f32, |acc, s| acc.max(s.abs()));
        if peak == 0.0 {
            return EmotionSample::neutral_default();
        }

        let normalized: Vec<f32> = samples
            .iter()
            .map(|s| if s.is_finite() { s / peak } else { 0.0 })
            .collect();
        let rms = compute_rms_energy(&normalized);

        let (category, confidence) = if rms > ANGER_RMS {
            (EmotionCategory::Anger, 0.65)
        } else if rms > JOY_RMS {
            (EmotionCategory::Joy, 0.60)
        } else if rms < SADNESS_RMS {
            (EmotionCategory::Sadness, 0.60)
        } else {
            (EmotionCategory::Neutral, 0.70)
        };
        EmotionSample::single(category, confidence)
    }
}

impl SpeechEmotionDetector for ProsodySpeechEmotion {
    fn detect(&self, samples: &[f32], _sample_rate: u32) -> Result<EmotionSample> {
        Ok(self.classify(samples))
    }
}
