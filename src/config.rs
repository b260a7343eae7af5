//! Configuration types for the emotion-aware voice pipeline.

use crate::emotion::ConflictResolution;
use crate::emotion::augmenter::{ConfidenceThresholds, EmotionPrompt, default_emotion_table};
use crate::models::ModelKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Audio format settings.
    pub audio: AudioConfig,
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// Speech + text emotion fusion.
    pub fusion: FusionConfig,
    /// Confidence thresholds for prompt augmentation.
    pub thresholds: ConfidenceThresholds,
    /// Per-emotion prompt additions and voice directives, keyed by label.
    pub emotions: BTreeMap<String, EmotionPrompt>,
    /// GPU memory budget and per-model footprints.
    pub memory: MemoryConfig,
    /// Which implementation backs each detector slot.
    pub detectors: DetectorConfig,
    /// Language model generation settings.
    pub llm: LlmConfig,
    /// Turn scheduling settings.
    pub pipeline: PipelineConfig,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            fusion: FusionConfig::default(),
            thresholds: ConfidenceThresholds::default(),
            emotions: default_emotion_table(),
            memory: MemoryConfig::default(),
            detectors: DetectorConfig::default(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Audio format configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
        }
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy threshold used by the energy detector.
    ///
    /// Typical values for f32 samples in \[-1, 1\]:
    ///   - 0.01: sensitive (quiet rooms)
    ///   - 0.02: default
    ///   - 0.05: only loud/close speech
    pub energy_threshold: f32,
    /// Frame length in ms used when trimming silence (512 samples at 16 kHz).
    pub frame_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: crate::vad::DEFAULT_ENERGY_THRESHOLD,
            frame_ms: 32,
        }
    }
}

/// Emotion fusion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Weight of the speech (prosody) detector.
    pub speech_weight: f32,
    /// Weight of the text (semantic) detector.
    pub text_weight: f32,
    /// How disagreeing detectors are combined.
    pub conflict_resolution: ConflictResolution,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            speech_weight: 0.6,
            text_weight: 0.4,
            conflict_resolution: ConflictResolution::SpeechDominant,
        }
    }
}

/// How current VRAM usage is measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryProbe {
    /// Sum the configured footprints of resident slots.
    #[default]
    Accounted,
    /// Ask `nvidia-smi`, falling back to accounting if it is unavailable.
    NvidiaSmi,
}

/// GPU memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Soft VRAM ceiling in GB. Exceeding it only logs a warning.
    pub max_vram_gb: f64,
    /// Usage measurement strategy.
    pub probe: MemoryProbe,
    /// Expected VRAM footprint per slot, used for accounting.
    pub footprint_gb: ModelFootprints,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_vram_gb: 5.5,
            probe: MemoryProbe::Accounted,
            footprint_gb: ModelFootprints::default(),
        }
    }
}

/// Expected VRAM footprint of each slot in GB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFootprints {
    pub stt: f64,
    pub speech_emotion: f64,
    pub text_emotion: f64,
    pub tts: f64,
    pub llm: f64,
    pub vad: f64,
}

impl Default for ModelFootprints {
    fn default() -> Self {
        Self {
            stt: 0.8,
            speech_emotion: 0.9,
            text_emotion: 0.35,
            tts: 2.0,
            llm: 1.6,
            vad: 0.05,
        }
    }
}

impl ModelFootprints {
    pub fn for_kind(&self, kind: ModelKind) -> f64 {
        match kind {
            ModelKind::Stt => self.stt,
            ModelKind::SpeechEmotion => self.speech_emotion,
            ModelKind::TextEmotion => self.text_emotion,
            ModelKind::Tts => self.tts,
            ModelKind::Llm => self.llm,
            ModelKind::Vad => self.vad,
        }
    }
}

/// Implementation behind a detector slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorBackend {
    /// The crate's heuristic detector.
    #[default]
    Builtin,
    /// A loader registered by the embedding application.
    External,
}

/// Detector backend selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub speech_emotion: DetectorBackend,
    pub text_emotion: DetectorBackend,
    pub vad: DetectorBackend,
}

/// Language model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Maximum tokens to generate per response.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f64,
    /// Top-p (nucleus) sampling.
    pub top_p: f64,
    /// Base system prompt file. `None` uses the built-in mentor prompt.
    pub system_prompt_path: Option<PathBuf>,
    /// Most recent history messages sent to the model (0 = all).
    pub max_history_messages: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            system_prompt_path: None,
            max_history_messages: 0,
        }
    }
}

/// Turn scheduling configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run speech and text emotion detection at the same time when all three
    /// emotion-phase slots fit the VRAM budget together.
    pub concurrent_emotion: bool,
}

impl SpeechConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::SpeechError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::SpeechError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/attune/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("attune").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("attune")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/attune-config/config.toml")
        }
    }
}
