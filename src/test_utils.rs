//! Scripted model collaborators shared by unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::config::{MemoryConfig, SpeechConfig};
use crate::emotion::{EmotionSample, LexiconTextEmotion, SpeechEmotionDetector};
use crate::error::{Result, SpeechError};
use crate::llm::{ChatMessage, GenerationParams, LanguageModel};
use crate::models::{
    AccountedMemory, DeviceMemory, ModelFactory, ModelHandle, ModelKind, ModelLifecycleManager,
};
use crate::pipeline::ConversationTurnOrchestrator;
use crate::pipeline::messages::{SpeechSegment, SynthesizedAudio};
use crate::stt::SpeechTranscriber;
use crate::tts::SpeechSynthesizer;
use crate::vad::EnergyVad;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct Script {
    transcript: String,
    response: String,
    empty_synthesis: bool,
    failing_speech_emotion: bool,
    failing_loads: BTreeSet<ModelKind>,
    mislabeled: Option<ModelKind>,
    load_delay: Duration,
    slow_load: Option<(ModelKind, Duration)>,
    synth_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            transcript: "I feel fine today".to_owned(),
            response: "Glad to hear it.".to_owned(),
            empty_synthesis: false,
            failing_speech_emotion: false,
            failing_loads: BTreeSet::new(),
            mislabeled: None,
            load_delay: Duration::ZERO,
            slow_load: None,
            synth_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    attempts: Mutex<HashMap<ModelKind, u64>>,
    loads: Mutex<HashMap<ModelKind, u64>>,
    /// Scripted model instances not yet dropped, and the most seen at once.
    live: Mutex<HashMap<ModelKind, u64>>,
    peak_live: Mutex<HashMap<ModelKind, u64>>,
    stt_calls: AtomicU64,
    synth_calls: AtomicU64,
    llm_requests: Mutex<Vec<Vec<ChatMessage>>>,
    directives: Mutex<Vec<String>>,
}

fn bump(map: &Mutex<HashMap<ModelKind, u64>>, kind: ModelKind) {
    *map.lock().unwrap().entry(kind).or_default() += 1;
}

fn count(map: &Mutex<HashMap<ModelKind, u64>>, kind: ModelKind) -> u64 {
    map.lock().unwrap().get(&kind).copied().unwrap_or(0)
}

/// Held by every scripted model; counts the instance as live until dropped.
struct Alive {
    kind: ModelKind,
    counters: Arc<Counters>,
}

impl Alive {
    fn new(kind: ModelKind, counters: &Arc<Counters>) -> Self {
        let mut live = counters.live.lock().unwrap();
        let now = live.entry(kind).or_default();
        *now += 1;
        let mut peak = counters.peak_live.lock().unwrap();
        let high = peak.entry(kind).or_default();
        *high = (*high).max(*now);
        drop(live);
        Self {
            kind,
            counters: Arc::clone(counters),
        }
    }
}

impl Drop for Alive {
    fn drop(&mut self) {
        if let Some(now) = self.counters.live.lock().unwrap().get_mut(&self.kind) {
            *now -= 1;
        }
    }
}

/// Factory producing scripted collaborators and counting every load.
///
/// Clones share counters.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModels {
    script: Script,
    counters: Arc<Counters>,
}

impl ScriptedModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose loads fail for `kinds`.
    pub fn failing(kinds: &[ModelKind]) -> Self {
        let mut models = Self::new();
        models.script.failing_loads = kinds.iter().copied().collect();
        models
    }

    /// Factory that hands back a VAD handle when asked for `kind`.
    pub fn mislabeled(kind: ModelKind) -> Self {
        let mut models = Self::new();
        models.script.mislabeled = Some(kind);
        models
    }

    pub fn with_load_delay_ms(mut self, ms: u64) -> Self {
        self.script.load_delay = Duration::from_millis(ms);
        self
    }

    /// Make loads of `kind` alone take `ms`.
    pub fn with_slow_load(mut self, kind: ModelKind, ms: u64) -> Self {
        self.script.slow_load = Some((kind, Duration::from_millis(ms)));
        self
    }

    pub fn with_synth_delay_ms(mut self, ms: u64) -> Self {
        self.script.synth_delay = Duration::from_millis(ms);
        self
    }

    pub fn with_failing_speech_emotion(mut self) -> Self {
        self.script.failing_speech_emotion = true;
        self
    }

    pub fn with_transcript(mut self, transcript: &str) -> Self {
        self.script.transcript = transcript.to_owned();
        self
    }

    pub fn with_response(mut self, response: &str) -> Self {
        self.script.response = response.to_owned();
        self
    }

    pub fn with_empty_synthesis(mut self) -> Self {
        self.script.empty_synthesis = true;
        self
    }

    pub fn attempts(&self, kind: ModelKind) -> u64 {
        count(&self.counters.attempts, kind)
    }

    pub fn loads(&self, kind: ModelKind) -> u64 {
        count(&self.counters.loads, kind)
    }

    /// Instances of `kind` created and not yet dropped.
    pub fn live(&self, kind: ModelKind) -> u64 {
        count(&self.counters.live, kind)
    }

    /// Instances of every kind created and not yet dropped.
    pub fn live_total(&self) -> u64 {
        self.counters.live.lock().unwrap().values().sum()
    }

    /// Most instances of `kind` alive at the same time.
    pub fn peak_live(&self, kind: ModelKind) -> u64 {
        count(&self.counters.peak_live, kind)
    }

    pub fn stt_calls(&self) -> u64 {
        self.counters.stt_calls.load(Ordering::SeqCst)
    }

    pub fn synth_calls(&self) -> u64 {
        self.counters.synth_calls.load(Ordering::SeqCst)
    }

    pub fn llm_requests(&self) -> Vec<Vec<ChatMessage>> {
        self.counters.llm_requests.lock().unwrap().clone()
    }

    pub fn directives(&self) -> Vec<String> {
        self.counters.directives.lock().unwrap().clone()
    }
}

impl ModelFactory for ScriptedModels {
    fn load(&self, kind: ModelKind) -> Result<ModelHandle> {
        bump(&self.counters.attempts, kind);
        if !self.script.load_delay.is_zero() {
            std::thread::sleep(self.script.load_delay);
        }
        if let Some((slow, delay)) = self.script.slow_load
            && slow == kind
        {
            std::thread::sleep(delay);
        }
        if self.script.failing_loads.contains(&kind) {
            return Err(SpeechError::model_load(kind.name(), "scripted failure"));
        }
        if self.script.mislabeled == Some(kind) {
            return Ok(ModelHandle::Vad(Arc::new(EnergyVad::default())));
        }
        let handle = match kind {
            ModelKind::Stt => ModelHandle::Stt(Arc::new(ScriptedStt {
                transcript: self.script.transcript.clone(),
                counters: Arc::clone(&self.counters),
                _alive: Alive::new(kind, &self.counters),
            })),
            ModelKind::SpeechEmotion => ModelHandle::SpeechEmotion(Arc::new(ScriptedSpeechEmotion {
                fail: self.script.failing_speech_emotion,
                _alive: Alive::new(kind, &self.counters),
            })),
            ModelKind::TextEmotion => ModelHandle::TextEmotion(Arc::new(LexiconTextEmotion::new())),
            ModelKind::Tts => ModelHandle::Tts(Arc::new(ScriptedTts {
                empty: self.script.empty_synthesis,
                delay: self.script.synth_delay,
                counters: Arc::clone(&self.counters),
                _alive: Alive::new(kind, &self.counters),
            })),
            ModelKind::Llm => ModelHandle::Llm(Arc::new(ScriptedLlm {
                response: self.script.response.clone(),
                counters: Arc::clone(&self.counters),
                _alive: Alive::new(kind, &self.counters),
            })),
            ModelKind::Vad => ModelHandle::Vad(Arc::new(EnergyVad::default())),
        };
        bump(&self.counters.loads, kind);
        Ok(handle)
    }
}

struct ScriptedStt {
    transcript: String,
    counters: Arc<Counters>,
    _alive: Alive,
}

impl SpeechTranscriber for ScriptedStt {
    fn transcribe(&self, _samples: &[f32], _sample_rate: u32) -> Result<String> {
        self.counters.stt_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transcript.clone())
    }
}

struct ScriptedSpeechEmotion {
    fail: bool,
    _alive: Alive,
}

impl SpeechEmotionDetector for ScriptedSpeechEmotion {
    fn detect(&self, _samples: &[f32], _sample_rate: u32) -> Result<EmotionSample> {
        if self.fail {
            return Err(SpeechError::Detection("classifier rejected input".into()));
        }
        let scores = [("neutral".to_owned(), 0.7), ("joy".to_owned(), 0.1)]
            .into_iter()
            .collect();
        Ok(EmotionSample::new("neutral", 0.7, scores))
    }
}

struct ScriptedLlm {
    response: String,
    counters: Arc<Counters>,
    _alive: Alive,
}

impl LanguageModel for ScriptedLlm {
    fn generate(&self, messages: &[ChatMessage], _params: &GenerationParams) -> Result<String> {
        self.counters
            .llm_requests
            .lock()
            .unwrap()
            .push(messages.to_vec());
        Ok(self.response.clone())
    }
}

struct ScriptedTts {
    empty: bool,
    delay: Duration,
    counters: Arc<Counters>,
    _alive: Alive,
}

impl SpeechSynthesizer for ScriptedTts {
    fn synthesize(&self, _text: &str, voice_directive: &str) -> Result<SynthesizedAudio> {
        self.counters.synth_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.counters
            .directives
            .lock()
            .unwrap()
            .push(voice_directive.to_owned());
        let samples = if self.empty { Vec::new() } else { vec![0.1; 2_400] };
        Ok(SynthesizedAudio::new(samples, 24_000))
    }
}

/// Manager over `models` with accounted memory and default budget.
pub fn test_manager(
    models: ScriptedModels,
) -> (Arc<ModelLifecycleManager>, ScriptedModels, Arc<AccountedMemory>) {
    let memory = Arc::new(AccountedMemory::new());
    let manager = ModelLifecycleManager::new(
        Arc::new(models.clone()),
        Arc::clone(&memory) as Arc<dyn DeviceMemory>,
        &MemoryConfig::default(),
    );
    (Arc::new(manager), models, memory)
}

/// Device memory that records how many scripted models were still alive
/// each time the reclaim hook ran.
pub struct ReclaimRecorder {
    models: ScriptedModels,
    live_at_reclaim: Mutex<Vec<u64>>,
}

impl ReclaimRecorder {
    pub fn live_at_reclaim(&self) -> Vec<u64> {
        self.live_at_reclaim.lock().unwrap().clone()
    }
}

impl DeviceMemory for ReclaimRecorder {
    fn allocated_gb(&self) -> Option<f64> {
        None
    }

    fn reclaim(&self) {
        let live = self.models.live_total();
        self.live_at_reclaim.lock().unwrap().push(live);
    }
}

/// Manager over `models` whose memory is a [`ReclaimRecorder`].
pub fn recording_manager(
    models: ScriptedModels,
) -> (Arc<ModelLifecycleManager>, Arc<ReclaimRecorder>) {
    let recorder = Arc::new(ReclaimRecorder {
        models: models.clone(),
        live_at_reclaim: Mutex::new(Vec::new()),
    });
    let manager = ModelLifecycleManager::new(
        Arc::new(models),
        Arc::clone(&recorder) as Arc<dyn DeviceMemory>,
        &MemoryConfig::default(),
    );
    (Arc::new(manager), recorder)
}

/// Orchestrator over a fresh manager backed by `models`.
pub fn orchestrator_with(
    models: &ScriptedModels,
    config: SpeechConfig,
) -> (ConversationTurnOrchestrator, Arc<AccountedMemory>) {
    let (manager, _, memory) = test_manager(models.clone());
    let orchestrator =
        ConversationTurnOrchestrator::new(manager, &config, "You are a patient mentor.");
    (orchestrator, memory)
}

/// One second of speech-level audio at 16 kHz.
pub fn speech_segment() -> SpeechSegment {
    let samples = (0..16_000)
        .map(|i| 0.3 * (i as f32 * 0.05).sin())
        .collect();
    SpeechSegment::new(samples, 16_000)
}
