//! Voice activity detection.
//!
//! The `vad` slot holds a [`VoiceActivityDetector`] that classifies fixed-size
//! frames. [`EnergyVad`] is the built-in RMS-threshold implementation and the
//! fallback when the configured detector fails to load.

use crate::config::VadConfig;
use std::ops::Range;
use tracing::debug;

/// Frame-level speech/non-speech classifier.
pub trait VoiceActivityDetector: Send + Sync {
    /// Returns `true` if `frame` contains speech.
    fn is_speech(&self, frame: &[f32], sample_rate: u32) -> bool;
}

/// Voice activity detector using RMS energy thresholding.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    threshold: f32,
}

/// Default RMS threshold for f32 samples in `[-1, 1]`.
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.02;

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(DEFAULT_ENERGY_THRESHOLD)
    }
}

impl EnergyVad {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn from_config(config: &VadConfig) -> Self {
        Self::new(config.energy_threshold)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn is_speech(&self, frame: &[f32], _sample_rate: u32) -> bool {
        compute_rms_energy(frame) > self.threshold
    }
}

/// Compute RMS energy of audio samples.
pub fn compute_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Number of samples in one `frame_ms` frame (at least one).
pub fn frame_len(sample_rate: u32, frame_ms: u32) -> usize {
    ((sample_rate as usize * frame_ms as usize) / 1000).max(1)
}

/// Sample range from the first to the last speech frame (inclusive).
///
/// Returns `None` when no frame is classified as speech. The trailing partial
/// frame is classified like any other.
pub fn speech_bounds(
    vad: &dyn VoiceActivityDetector,
    samples: &[f32],
    sample_rate: u32,
    frame_ms: u32,
) -> Option<Range<usize>> {
    let len = frame_len(sample_rate, frame_ms);
    let mut first: Option<usize> = None;
    let mut last_end = 0;

    for (i, frame) in samples.chunks(len).enumerate() {
        if vad.is_speech(frame, sample_rate) {
            let start = i * len;
            first.get_or_insert(start);
            last_end = start + frame.len();
        }
    }

    let range = first.map(|start| start..last_end);
    debug!(
        total = samples.len(),
        frame_len = len,
        range = ?range,
        "voice activity bounds"
    );
    range
}
