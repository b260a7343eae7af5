//! Emotion detection outputs, fusion, and prompt augmentation.
//!
//! Two detectors score each user utterance independently: one over the raw
//! audio (prosody), one over the transcript (semantics). Their
//! [`EmotionSample`]s are combined by the [`EmotionFusionEngine`] into a single
//! [`FusedEmotion`], which the [`PromptAugmenter`] turns into extra system
//! prompt text and a voice directive for synthesis.

pub mod augmenter;
pub mod detector;
pub mod fusion;
pub mod lexicon;
pub mod prosody;

pub use augmenter::{EmotionPrompt, EmotionPromptConfig, PromptAugmenter};
pub use detector::{SpeechEmotionDetector, TextEmotionDetector};
pub use fusion::{ConflictResolution, EmotionFusionEngine, FusedEmotion};
pub use lexicon::LexiconTextEmotion;
pub use prosody::ProsodySpeechEmotion;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The fixed category set every fused distribution is expressed over.
///
/// Declaration order is the canonical ordering: it drives score vectors,
/// `BTreeMap` iteration, and arg-max tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionCategory {
    Anger,
    Disgust,
    Fear,
    Joy,
    Neutral,
    Sadness,
    Surprise,
    Confusion,
}

impl EmotionCategory {
    /// All categories in canonical order.
    pub const ALL: [EmotionCategory; 8] = [
        Self::Anger,
        Self::Disgust,
        Self::Fear,
        Self::Joy,
        Self::Neutral,
        Self::Sadness,
        Self::Surprise,
        Self::Confusion,
    ];

    /// Lowercase label used in configuration tables and detector output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anger => "anger",
            Self::Disgust => "disgust",
            Self::Fear => "fear",
            Self::Joy => "joy",
            Self::Neutral => "neutral",
            Self::Sadness => "sadness",
            Self::Surprise => "surprise",
            Self::Confusion => "confusion",
        }
    }

    /// Position in [`EmotionCategory::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Case-insensitive label lookup. Unknown labels, including ones with
    /// surrounding whitespace, return `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for EmotionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score left on `neutral` in the neutral default sample so its score vector
/// is never zero-norm.
pub const NEUTRAL_RESIDUAL: f32 = 0.1;

/// Output of one detector (speech or text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionSample {
    /// Top label as reported by the detector. Usually one of the fixed
    /// categories, but detectors may emit labels outside the set.
    pub label: String,
    /// Confidence in `label`, `0.0..=1.0`. Authoritative over `scores[label]`.
    pub confidence: f32,
    /// Per-category scores. Absent categories count as zero; the map need not
    /// sum to one.
    #[serde(default)]
    pub scores: HashMap<String, f32>,
}

impl EmotionSample {
    /// Create a sample with an explicit score map.
    pub fn new(label: impl Into<String>, confidence: f32, scores: HashMap<String, f32>) -> Self {
        Self {
            label: label.into(),
            confidence,
            scores,
        }
    }

    /// Create a sample whose only score is `confidence` on `category`.
    pub fn single(category: EmotionCategory, confidence: f32) -> Self {
        let mut scores = HashMap::new();
        scores.insert(category.as_str().to_owned(), confidence);
        Self::new(category.as_str(), confidence, scores)
    }

    /// The sample substituted when a detector cannot produce one.
    pub fn neutral_default() -> Self {
        let mut sample = Self::single(EmotionCategory::Neutral, NEUTRAL_RESIDUAL);
        sample.confidence = 0.5;
        sample
    }

    /// Case-insensitive label comparison.
    pub fn label_matches(&self, other: &EmotionSample) -> bool {
        self.label.to_lowercase() == other.label.to_lowercase()
    }

    /// The label mapped onto the fixed category set, if it belongs to it.
    pub fn category(&self) -> Option<EmotionCategory> {
        EmotionCategory::from_label(&self.label)
    }
}
