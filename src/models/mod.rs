//! GPU-resident model slots.
//!
//! Every large model the pipeline uses lives in one named slot. Slots are
//! either persistent (loaded at start-up, kept until shutdown) or transient
//! (loaded for a single pipeline phase and released right after it). The
//! [`ModelLifecycleManager`] owns the slot table; a [`ModelFactory`] turns a
//! slot name into a live [`ModelHandle`].

pub mod lifecycle;
pub mod registry;
pub mod vram;

pub use lifecycle::{ModelLifecycleManager, SlotLease, SlotSnapshot, SlotState};
pub use registry::LoaderRegistry;
pub use vram::{AccountedMemory, BudgetStatus, DeviceMemory, NvidiaSmiMemory};

use crate::emotion::{SpeechEmotionDetector, TextEmotionDetector};
use crate::error::{Result, SpeechError};
use crate::llm::LanguageModel;
use crate::stt::SpeechTranscriber;
use crate::tts::SpeechSynthesizer;
use crate::vad::VoiceActivityDetector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Named model slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Stt,
    SpeechEmotion,
    TextEmotion,
    Tts,
    Llm,
    Vad,
}

/// Whether a slot stays resident between turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidencyClass {
    /// Loaded once at initialization, released only at shutdown.
    Persistent,
    /// Loaded right before its phase, released right after it.
    Transient,
}

impl ModelKind {
    pub const ALL: [ModelKind; 6] = [
        Self::Stt,
        Self::SpeechEmotion,
        Self::TextEmotion,
        Self::Tts,
        Self::Llm,
        Self::Vad,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Stt => "stt",
            Self::SpeechEmotion => "speech_emotion",
            Self::TextEmotion => "text_emotion",
            Self::Tts => "tts",
            Self::Llm => "llm",
            Self::Vad => "vad",
        }
    }

    pub fn residency(self) -> ResidencyClass {
        match self {
            Self::Llm | Self::Vad => ResidencyClass::Persistent,
            Self::Stt | Self::SpeechEmotion | Self::TextEmotion | Self::Tts => {
                ResidencyClass::Transient
            }
        }
    }

    pub fn is_transient(self) -> bool {
        self.residency() == ResidencyClass::Transient
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name() == s.trim())
            .ok_or_else(|| SpeechError::Config(format!("unknown model slot: {s}")))
    }
}

impl fmt::Display for ResidencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Persistent => "persistent",
            Self::Transient => "transient",
        })
    }
}

/// A live model, typed by the capability its slot provides.
#[derive(Clone)]
pub enum ModelHandle {
    Stt(Arc<dyn SpeechTranscriber>),
    SpeechEmotion(Arc<dyn SpeechEmotionDetector>),
    TextEmotion(Arc<dyn TextEmotionDetector>),
    Tts(Arc<dyn SpeechSynthesizer>),
    Llm(Arc<dyn LanguageModel>),
    Vad(Arc<dyn VoiceActivityDetector>),
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelHandle").field(&self.kind()).finish()
    }
}

fn wrong_kind(expected: ModelKind, actual: ModelKind) -> SpeechError {
    SpeechError::Pipeline(format!(
        "expected a {expected} model, slot holds a {actual} model"
    ))
}

impl ModelHandle {
    /// Slot this handle belongs in.
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Stt(_) => ModelKind::Stt,
            Self::SpeechEmotion(_) => ModelKind::SpeechEmotion,
            Self::TextEmotion(_) => ModelKind::TextEmotion,
            Self::Tts(_) => ModelKind::Tts,
            Self::Llm(_) => ModelKind::Llm,
            Self::Vad(_) => ModelKind::Vad,
        }
    }

    pub fn transcriber(&self) -> Result<Arc<dyn SpeechTranscriber>> {
        match self {
            Self::Stt(m) => Ok(Arc::clone(m)),
            other => Err(wrong_kind(ModelKind::Stt, other.kind())),
        }
    }

    pub fn speech_emotion(&self) -> Result<Arc<dyn SpeechEmotionDetector>> {
        match self {
            Self::SpeechEmotion(m) => Ok(Arc::clone(m)),
            other => Err(wrong_kind(ModelKind::SpeechEmotion, other.kind())),
        }
    }

    pub fn text_emotion(&self) -> Result<Arc<dyn TextEmotionDetector>> {
        match self {
            Self::TextEmotion(m) => Ok(Arc::clone(m)),
            other => Err(wrong_kind(ModelKind::TextEmotion, other.kind())),
        }
    }

    pub fn synthesizer(&self) -> Result<Arc<dyn SpeechSynthesizer>> {
        match self {
            Self::Tts(m) => Ok(Arc::clone(m)),
            other => Err(wrong_kind(ModelKind::Tts, other.kind())),
        }
    }

    pub fn language_model(&self) -> Result<Arc<dyn LanguageModel>> {
        match self {
            Self::Llm(m) => Ok(Arc::clone(m)),
            other => Err(wrong_kind(ModelKind::Llm, other.kind())),
        }
    }

    pub fn voice_activity(&self) -> Result<Arc<dyn VoiceActivityDetector>> {
        match self {
            Self::Vad(m) => Ok(Arc::clone(m)),
            other => Err(wrong_kind(ModelKind::Vad, other.kind())),
        }
    }
}

/// Materializes the model for a slot.
///
/// Called with the slot's transition lock released but the slot marked
/// `Loading`, so concurrent requests for the same slot wait instead of
/// loading twice. May block (weights are read from disk and uploaded).
pub trait ModelFactory: Send + Sync {
    /// # Errors
    ///
    /// Any error is reported to the caller as
    /// [`SpeechError::ModelLoad`]; the slot stays unloaded.
    fn load(&self, kind: ModelKind) -> Result<ModelHandle>;
}
