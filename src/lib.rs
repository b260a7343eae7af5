//! Attune: emotion-aware voice conversation pipeline.
//!
//! Each user utterance passes through one cascaded turn:
//! VAD → STT → speech emotion → text emotion → fusion → prompt augmentation
//! → LLM → TTS
//!
//! # Architecture
//!
//! - **Emotion**: two detectors score the audio and the transcript; the
//!   [`EmotionFusionEngine`] merges them and the [`PromptAugmenter`] turns
//!   the result into system prompt context and a voice directive.
//! - **Models**: the [`ModelLifecycleManager`] keeps the LLM and VAD resident
//!   and loads every other model only for the phase that needs it, so the
//!   whole set fits a small GPU memory budget.
//! - **Pipeline**: the [`ConversationTurnOrchestrator`] drives one turn per
//!   call against a caller-owned [`ConversationContext`], reporting progress
//!   as [`RuntimeEvent`]s.
//!
//! Concrete model backends plug in through [`ModelFactory`] (usually a
//! [`LoaderRegistry`]).

pub mod config;
pub mod diagnostics;
pub mod emotion;
pub mod error;
pub mod llm;
pub mod models;
pub mod personality;
pub mod pipeline;
pub mod runtime;
pub mod stt;
pub mod tts;
pub mod vad;

#[cfg(test)]
mod test_utils;

pub use config::SpeechConfig;
pub use emotion::{
    EmotionCategory, EmotionFusionEngine, EmotionSample, FusedEmotion, PromptAugmenter,
};
pub use error::{Result, SpeechError};
pub use models::{LoaderRegistry, ModelFactory, ModelHandle, ModelKind, ModelLifecycleManager};
pub use pipeline::{ConversationContext, ConversationTurnOrchestrator, TurnOutcome};
pub use runtime::RuntimeEvent;
