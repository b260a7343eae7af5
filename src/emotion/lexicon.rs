//! Keyword-heuristic text emotion detector.
//!
//! A fast scan over the lowercased words of the transcript. Single-word
//! keywords match whole words only, so "whatever" is not "hate". Phrases match
//! runs of whole words and claim them: "lost track" counts as confusion and
//! not also as the sadness keyword "lost". Every category with at least one
//! hit gets a score from the hit count; the best category becomes the label. Meant as the built-in `text_emotion` backend when no
//! classifier model is configured, or as a test double with real behaviour.

use super::{EmotionCategory, EmotionSample, TextEmotionDetector};
use crate::error::Result;
use std::collections::{HashMap, HashSet};

/// (category, keywords). Neutral has no keywords: it is the fallback.
const KEYWORD_TABLE: &[(EmotionCategory, &[&str])] = &[
    (
        EmotionCategory::Anger,
        &[
            "angry",
            "furious",
            "frustrated",
            "frustrating",
            "annoyed",
            "hate",
            "sick of",
            "fed up",
            "unfair",
            "ridiculous",
        ],
    ),
    (
        EmotionCategory::Disgust,
        &[
            "disgusting",
            "gross",
            "revolting",
            "repulsive",
            "vile",
            "nauseating",
            "makes me sick",
        ],
    ),
    (
        EmotionCategory::Fear,
        &[
            "afraid",
            "scared",
            "anxious",
            "anxiety",
            "worried",
            "terrified",
            "nervous",
            "panic",
            "what if",
            "dread",
        ],
    ),
    (
        EmotionCategory::Joy,
        &[
            "happy",
            "excited",
            "great",
            "wonderful",
            "love",
            "amazing",
            "fantastic",
            "glad",
            "thrilled",
            "grateful",
        ],
    ),
    (
        EmotionCategory::Sadness,
        &[
            "sad",
            "lonely",
            "depressed",
            "miss",
            "missing",
            "lost",
            "hopeless",
            "crying",
            "grief",
            "heartbroken",
            "empty",
        ],
    ),
    (
        EmotionCategory::Surprise,
        &[
            "surprised",
            "unexpected",
            "can't believe",
            "shocked",
            "wow",
            "suddenly",
            "no way",
        ],
    ),
    (
        EmotionCategory::Confusion,
        &[
            "confused",
            "don't understand",
            "doesn't make sense",
            "unclear",
            "lost track",
            "puzzled",
            "not sure",
            "makes no sense",
        ],
    ),
];

/// Confidence by hit count with diminishing returns.
///
/// 1 hit → 0.35, 2 → 0.55, 3 → 0.70, then +0.05 per hit capped at 0.90.
pub fn confidence_for_hits(hits: usize) -> f32 {
    match hits {
        0 => 0.0,
        1 => 0.35,
        2 => 0.55,
        3 => 0.70,
        _ => (0.70 + 0.05 * (hits as f32 - 3.0)).min(0.90),
    }
}

/// Built-in keyword text emotion detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexiconTextEmotion;

impl LexiconTextEmotion {
    pub fn new() -> Self {
        Self
    }

    /// Classify `text`. Infallible; empty or keyword-free text is neutral.
    pub fn classify(&self, text: &str) -> EmotionSample {
        let words = words(text);
        if words.is_empty() {
            return EmotionSample::neutral_default();
        }
        let hits = keyword_hits(&words);

        let mut scores = HashMap::new();
        let mut best: Option<(EmotionCategory, usize)> = None;
        for (&(category, _), &hits) in KEYWORD_TABLE.iter().zip(&hits) {
            if hits == 0 {
                continue;
            }
            scores.insert(category.as_str().to_owned(), confidence_for_hits(hits));
            if best.is_none_or(|(_, top)| hits > top) {
                best = Some((category, hits));
            }
        }

        match best {
            Some((category, hits)) => {
                EmotionSample::new(category.as_str(), confidence_for_hits(hits), scores)
            }
            None => EmotionSample::neutral_default(),
        }
    }
}

/// Lowercased words of `text`, split on anything other than letters, digits
/// and apostrophes. Typographic apostrophes are folded to `'`.
fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .replace('\u{2019}', "'")
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Distinct keywords hit per [`KEYWORD_TABLE`] row.
fn keyword_hits(words: &[String]) -> [usize; KEYWORD_TABLE.len()] {
    let mut hits = [0; KEYWORD_TABLE.len()];
    // Padded with spaces so a phrase only matches on word boundaries.
    let mut text = format!(" {} ", words.join(" "));

    for (row, &(_, keywords)) in KEYWORD_TABLE.iter().enumerate() {
        for phrase in keywords.iter().filter(|kw| kw.contains(' ')) {
            let needle = format!(" {phrase} ");
            if text.contains(&needle) {
                hits[row] += 1;
                text = text.replace(&needle, " | ");
            }
        }
    }

    let remaining: HashSet<&str> = text.split_whitespace().collect();
    for (row, &(_, keywords)) in KEYWORD_TABLE.iter().enumerate() {
        hits[row] += keywords
            .iter()
            .filter(|kw| !kw.contains(' ') && remaining.contains(**kw))
            .count();
    }
    hits
}

impl TextEmotionDetector for LexiconTextEmotion {
    fn detect(&self, text: &str) -> Result<EmotionSample> {
        Ok(self.classify(text))
    }
}
