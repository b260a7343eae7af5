//! Table-driven [`ModelFactory`].
//!
//! The embedding application registers one loader closure per slot. Built-in
//! heuristic detectors are registered only for slots whose `[detectors]`
//! backend is `builtin`; nothing is chosen by probing the machine.

use crate::config::{DetectorBackend, SpeechConfig};
use crate::emotion::{LexiconTextEmotion, ProsodySpeechEmotion};
use crate::error::{Result, SpeechError};
use crate::models::{ModelFactory, ModelHandle, ModelKind};
use crate::vad::EnergyVad;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

type Loader = Box<dyn Fn() -> Result<ModelHandle> + Send + Sync>;

/// Per-slot loader table.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: BTreeMap<ModelKind, Loader>,
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("slots", &self.loaders.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in detectors selected in
    /// `config.detectors`.
    pub fn with_builtin_detectors(config: &SpeechConfig) -> Self {
        let mut registry = Self::new();
        if config.detectors.speech_emotion == DetectorBackend::Builtin {
            registry.register(ModelKind::SpeechEmotion, || {
                Ok(ModelHandle::SpeechEmotion(Arc::new(ProsodySpeechEmotion::new())))
            });
        }
        if config.detectors.text_emotion == DetectorBackend::Builtin {
            registry.register(ModelKind::TextEmotion, || {
                Ok(ModelHandle::TextEmotion(Arc::new(LexiconTextEmotion::new())))
            });
        }
        if config.detectors.vad == DetectorBackend::Builtin {
            let threshold = config.vad.energy_threshold;
            registry.register(ModelKind::Vad, move || {
                Ok(ModelHandle::Vad(Arc::new(EnergyVad::new(threshold))))
            });
        }
        registry
    }

    /// Register (or replace) the loader for `kind`.
    pub fn register<F>(&mut self, kind: ModelKind, loader: F) -> &mut Self
    where
        F: Fn() -> Result<ModelHandle> + Send + Sync + 'static,
    {
        if self.loaders.insert(kind, Box::new(loader)).is_some() {
            debug!(model = %kind, "replacing registered loader");
        }
        self
    }

    pub fn has_loader(&self, kind: ModelKind) -> bool {
        self.loaders.contains_key(&kind)
    }
}

impl ModelFactory for LoaderRegistry {
    fn load(&self, kind: ModelKind) -> Result<ModelHandle> {
        let loader = self
            .loaders
            .get(&kind)
            .ok_or_else(|| SpeechError::model_load(kind.name(), "no loader registered"))?;
        loader()
    }
}
