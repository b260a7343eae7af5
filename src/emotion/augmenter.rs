//! Emotion-aware system prompt and voice directive selection.

use super::{EmotionCategory, FusedEmotion};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Fused confidence at or above which the emotion is acted on.
///
/// Below it the system prompt is left untouched and synthesis uses the
/// neutral voice.
pub const AUGMENT_MIN_CONFIDENCE: f32 = 0.5;

/// Voice directive used when the table has no usable entry.
pub const GENERIC_VOICE_DIRECTIVE: &str = "A calm, thoughtful voice speaks clearly with measured pace";

/// Per-emotion guidance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionPrompt {
    /// Text appended to the system prompt. Empty means "no augmentation".
    pub prompt_addition: String,
    /// Style directive handed to the speech synthesizer.
    pub tts_description: String,
}

impl EmotionPrompt {
    fn new(prompt_addition: &str, tts_description: &str) -> Self {
        Self {
            prompt_addition: prompt_addition.to_owned(),
            tts_description: tts_description.to_owned(),
        }
    }
}

/// Confidence thresholds read from configuration.
///
/// Neither value gates augmentation: the fixed [`AUGMENT_MIN_CONFIDENCE`]
/// cut-off is what decides. Both are parsed and logged at start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    pub high_confidence: f32,
    pub low_confidence: f32,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high_confidence: 0.7,
            low_confidence: 0.3,
        }
    }
}

/// Standalone emotion prompt table, loadable from its own TOML file.
///
/// ```toml
/// [thresholds]
/// high_confidence = 0.7
/// low_confidence = 0.3
///
/// [emotions.anger]
/// prompt_addition = "..."
/// tts_description = "..."
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionPromptConfig {
    pub thresholds: ConfidenceThresholds,
    /// Keyed by lowercase category label.
    pub emotions: BTreeMap<String, EmotionPrompt>,
}

impl Default for EmotionPromptConfig {
    fn default() -> Self {
        Self {
            thresholds: ConfidenceThresholds::default(),
            emotions: default_emotion_table(),
        }
    }
}

impl EmotionPromptConfig {
    /// Load a prompt table from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::SpeechError::Config(e.to_string()))
    }
}

/// Built-in guidance for the most common emotions.
pub fn default_emotion_table() -> BTreeMap<String, EmotionPrompt> {
    let entries = [
        (
            EmotionCategory::Anger,
            EmotionPrompt::new(
                "The user is expressing anger or frustration. Acknowledge their frustration directly without dismissing it.",
                "A calm, steady voice that is grounding",
            ),
        ),
        (
            EmotionCategory::Sadness,
            EmotionPrompt::new(
                "The user is experiencing sadness. Show genuine understanding of their pain. Be gentle.",
                "A warm, gentle voice with compassion",
            ),
        ),
        (
            EmotionCategory::Fear,
            EmotionPrompt::new(
                "The user is expressing fear or anxiety. Ground them in reality and help them identify what they can control.",
                "A calm, reassuring voice that is stable",
            ),
        ),
        (
            EmotionCategory::Joy,
            EmotionPrompt::new(
                "The user seems happy or excited. Engage warmly while deepening their reflection.",
                "A warm, engaged voice with enthusiasm",
            ),
        ),
        (
            EmotionCategory::Neutral,
            EmotionPrompt::new("", "A calm, thoughtful voice speaks clearly"),
        ),
    ];
    entries
        .into_iter()
        .map(|(category, prompt)| (category.as_str().to_owned(), prompt))
        .collect()
}

/// Maps a [`FusedEmotion`] to prompt text and a voice directive.
///
/// Never fails: missing entries fall through to the unmodified prompt or the
/// generic voice directive.
#[derive(Debug, Clone)]
pub struct PromptAugmenter {
    emotions: BTreeMap<String, EmotionPrompt>,
    thresholds: ConfidenceThresholds,
}

impl Default for PromptAugmenter {
    fn default() -> Self {
        Self::new(EmotionPromptConfig::default())
    }
}

impl PromptAugmenter {
    /// Build from an already-loaded table. Labels are lowercased.
    pub fn new(config: EmotionPromptConfig) -> Self {
        let emotions = config
            .emotions
            .into_iter()
            .map(|(label, prompt)| (label.trim().to_lowercase(), prompt))
            .collect::<BTreeMap<_, _>>();
        info!(
            entries = emotions.len(),
            high_confidence = config.thresholds.high_confidence,
            low_confidence = config.thresholds.low_confidence,
            min_confidence = AUGMENT_MIN_CONFIDENCE,
            "prompt augmenter ready (high_confidence is loaded but unused)"
        );
        Self {
            emotions,
            thresholds: config.thresholds,
        }
    }

    /// Build from the `[thresholds]` and `[emotions]` sections of the main
    /// configuration.
    pub fn from_config(config: &crate::config::SpeechConfig) -> Self {
        Self::new(EmotionPromptConfig {
            thresholds: config.thresholds.clone(),
            emotions: config.emotions.clone(),
        })
    }

    /// Load the table from a TOML file, falling back to the built-in table if
    /// the file is missing or unparseable.
    pub fn from_file(path: &Path) -> Self {
        match EmotionPromptConfig::from_file(path) {
            Ok(config) => Self::new(config),
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "emotion prompt table unavailable, using built-in defaults"
                );
                Self::default()
            }
        }
    }

    pub fn thresholds(&self) -> &ConfidenceThresholds {
        &self.thresholds
    }

    /// Append the primary emotion's guidance to `base`.
    ///
    /// Returns `base` unchanged when confidence is below
    /// [`AUGMENT_MIN_CONFIDENCE`] or the emotion has no (non-blank) addition.
    pub fn augment_system_prompt(&self, base: &str, fused: &FusedEmotion) -> String {
        if fused.confidence < AUGMENT_MIN_CONFIDENCE {
            debug!(
                confidence = fused.confidence,
                "low-confidence emotion, prompt unchanged"
            );
            return base.to_owned();
        }
        let Some(entry) = self.entry(fused.primary_emotion) else {
            return base.to_owned();
        };
        let addition = entry.prompt_addition.trim();
        if addition.is_empty() {
            return base.to_owned();
        }
        format!("{base}\n\n---\n\nEMOTION CONTEXT:\n{addition}\n\n---\n")
    }

    /// Pick the synthesis style for this turn.
    pub fn get_voice_directive(&self, fused: &FusedEmotion) -> String {
        let category = if fused.confidence < AUGMENT_MIN_CONFIDENCE {
            EmotionCategory::Neutral
        } else {
            fused.primary_emotion
        };
        self.entry(category)
            .map(|e| e.tts_description.trim())
            .filter(|d| !d.is_empty())
            .unwrap_or(GENERIC_VOICE_DIRECTIVE)
            .to_owned()
    }

    fn entry(&self, category: EmotionCategory) -> Option<&EmotionPrompt> {
        self.emotions.get(category.as_str())
    }
}
