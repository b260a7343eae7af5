//! Speech + text emotion fusion.
//!
//! Both detector outputs are projected onto the fixed category set and
//! combined with one of three conflict-resolution policies. The result also
//! carries a source-agreement score: how much the two detectors concur, mixing
//! the cosine of their score vectors with whether their top labels match.

use super::{EmotionCategory, EmotionSample};
use crate::config::FusionConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Speech weight used under [`ConflictResolution::SpeechDominant`] when the
/// speech detector is confident.
const CONFIDENT_SPEECH_ALPHA: f32 = 0.8;

/// Speech confidence above which [`CONFIDENT_SPEECH_ALPHA`] applies.
const CONFIDENT_SPEECH_THRESHOLD: f32 = 0.7;

/// Minimum combined score for the runner-up to be reported.
const SECONDARY_MIN_SCORE: f32 = 0.2;

const AGREEMENT_COSINE_WEIGHT: f32 = 0.6;
const AGREEMENT_LABEL_WEIGHT: f32 = 0.4;

const CATEGORY_COUNT: usize = EmotionCategory::ALL.len();

type ScoreVector = [f32; CATEGORY_COUNT];

/// Policy for combining disagreeing detectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Lean on the prosody signal, more heavily when it is confident.
    #[default]
    SpeechDominant,
    /// Fixed weighted sum of both sources.
    Averaging,
    /// Average when the top labels agree, otherwise fall back to neutral.
    Consensus,
}

impl ConflictResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpeechDominant => "speech_dominant",
            Self::Averaging => "averaging",
            Self::Consensus => "consensus",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single emotional context derived from both detectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedEmotion {
    /// Arg-max of `combined_scores`.
    pub primary_emotion: EmotionCategory,
    /// Combined score of `primary_emotion`.
    pub confidence: f32,
    /// Runner-up category, present only when its score exceeds 0.2.
    pub secondary_emotion: Option<EmotionCategory>,
    /// Score for every category in the fixed set.
    pub combined_scores: BTreeMap<EmotionCategory, f32>,
    /// Detector agreement in `0.0..=1.0`.
    pub source_agreement: f32,
    /// Policy that produced this result.
    pub fusion_method: ConflictResolution,
}

impl FusedEmotion {
    /// Combined score for `category` (zero if somehow absent).
    pub fn score(&self, category: EmotionCategory) -> f32 {
        self.combined_scores.get(&category).copied().unwrap_or(0.0)
    }
}

/// Combines speech and text [`EmotionSample`]s into a [`FusedEmotion`].
///
/// Stateless after construction; safe to share across sessions.
#[derive(Debug, Clone)]
pub struct EmotionFusionEngine {
    speech_weight: f32,
    text_weight: f32,
    policy: ConflictResolution,
}

impl EmotionFusionEngine {
    /// Build an engine from the `[fusion]` configuration section.
    ///
    /// Weights outside `0.0..=1.0` (or non-finite) are clamped so combined
    /// scores stay non-negative.
    pub fn new(config: &FusionConfig) -> Self {
        let speech_weight = clamp_weight("speech_weight", config.speech_weight);
        let text_weight = clamp_weight("text_weight", config.text_weight);
        Self {
            speech_weight,
            text_weight,
            policy: config.conflict_resolution,
        }
    }

    pub fn policy(&self) -> ConflictResolution {
        self.policy
    }

    /// Fuse one speech sample and one text sample.
    pub fn fuse(&self, speech: &EmotionSample, text: &EmotionSample) -> FusedEmotion {
        let s = normalize(speech);
        let t = normalize(text);
        let labels_agree = speech.label_matches(text);

        let source_agreement = agreement(&s, &t, labels_agree);

        let combined = match self.policy {
            ConflictResolution::SpeechDominant => {
                let alpha = if speech.confidence > CONFIDENT_SPEECH_THRESHOLD {
                    CONFIDENT_SPEECH_ALPHA
                } else {
                    self.speech_weight
                };
                blend(&s, &t, alpha, 1.0 - alpha)
            }
            ConflictResolution::Averaging => blend(&s, &t, self.speech_weight, self.text_weight),
            ConflictResolution::Consensus if labels_agree => {
                blend(&s, &t, self.speech_weight, self.text_weight)
            }
            ConflictResolution::Consensus => {
                debug!(
                    speech = %speech.label,
                    text = %text.label,
                    "detectors disagree, consensus collapses to neutral"
                );
                let mut v = [0.0; CATEGORY_COUNT];
                v[EmotionCategory::Neutral.index()] = 1.0;
                v
            }
        };

        let ranked = rank(&combined);
        let (primary_emotion, confidence) = ranked[0];
        let secondary_emotion = ranked
            .get(1)
            .filter(|(_, score)| *score > SECONDARY_MIN_SCORE)
            .map(|(category, _)| *category);

        FusedEmotion {
            primary_emotion,
            confidence,
            secondary_emotion,
            combined_scores: EmotionCategory::ALL
                .into_iter()
                .map(|c| (c, combined[c.index()]))
                .collect(),
            source_agreement,
            fusion_method: self.policy,
        }
    }
}

fn clamp_weight(name: &str, weight: f32) -> f32 {
    if weight.is_finite() && (0.0..=1.0).contains(&weight) {
        return weight;
    }
    let clamped = if weight.is_finite() {
        weight.clamp(0.0, 1.0)
    } else {
        0.0
    };
    warn!(name, weight, clamped, "fusion weight out of range, clamping");
    clamped
}

/// Project a sample's score map onto the fixed category set.
///
/// Keys are matched case-insensitively; unknown keys are dropped. Negative or
/// non-finite scores count as zero. Keys differing only in case keep the
/// larger score, independent of map iteration order.
fn normalize(sample: &EmotionSample) -> ScoreVector {
    let mut v = [0.0_f32; CATEGORY_COUNT];
    for (key, score) in &sample.scores {
        let Some(category) = EmotionCategory::from_label(key) else {
            continue;
        };
        if score.is_finite() && *score > 0.0 {
            let slot = &mut v[category.index()];
            *slot = slot.max(*score);
        }
    }
    v
}

fn agreement(s: &ScoreVector, t: &ScoreVector, labels_agree: bool) -> f32 {
    let label_term = if labels_agree { 1.0 } else { 0.0 };
    let raw = AGREEMENT_COSINE_WEIGHT * cosine(s, t) + AGREEMENT_LABEL_WEIGHT * label_term;
    raw.clamp(0.0, 1.0)
}

fn cosine(a: &ScoreVector, b: &ScoreVector) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn blend(s: &ScoreVector, t: &ScoreVector, ws: f32, wt: f32) -> ScoreVector {
    let mut v = [0.0; CATEGORY_COUNT];
    for i in 0..CATEGORY_COUNT {
        v[i] = ws * s[i] + wt * t[i];
    }
    v
}

/// Categories sorted by score, highest first. The sort is stable, so equal
/// scores keep canonical category order.
fn rank(v: &ScoreVector) -> Vec<(EmotionCategory, f32)> {
    let mut ranked: Vec<(EmotionCategory, f32)> = EmotionCategory::ALL
        .into_iter()
        .map(|c| (c, v[c.index()]))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}
