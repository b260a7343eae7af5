//! Shared helpers for integration tests.
//!
//! Backends are registered through the public [`LoaderRegistry`] with the
//! built-in prosody, lexicon and energy detectors, plus scripted STT, LLM and
//! TTS collaborators whose calls are recorded for assertions.

use attune::config::SpeechConfig;
use attune::error::{Result, SpeechError};
use attune::llm::{ChatMessage, GenerationParams, LanguageModel};
use attune::models::{
    AccountedMemory, DeviceMemory, LoaderRegistry, ModelFactory, ModelHandle, ModelKind,
    ModelLifecycleManager,
};
use attune::pipeline::{ConversationTurnOrchestrator, SpeechSegment, SynthesizedAudio};
use attune::runtime::RuntimeEvent;
use attune::stt::SpeechTranscriber;
use attune::tts::SpeechSynthesizer;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub(crate) const TEST_SYSTEM_PROMPT: &str = "You are a patient mentor.";

/// Scripted STT/LLM/TTS behaviour plus call recording.
///
/// Clones share their recordings.
#[derive(Clone)]
pub(crate) struct ScriptedBackends {
    transcript: String,
    response: String,
    tts_delay: Duration,
    slow_load: Option<(ModelKind, Duration)>,
    failing: Vec<ModelKind>,
    remaining_failures: Arc<Mutex<HashMap<ModelKind, usize>>>,
    attempts: Arc<Mutex<Vec<ModelKind>>>,
    loads: Arc<Mutex<Vec<ModelKind>>>,
    llm_requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    directives: Arc<Mutex<Vec<String>>>,
    synth_started: Arc<AtomicUsize>,
    live_synthesizers: Arc<AtomicUsize>,
}

impl ScriptedBackends {
    pub(crate) fn new() -> Self {
        Self {
            transcript: "I'm so angry and frustrated with this project".to_owned(),
            response: "That sounds hard. What part frustrates you most?".to_owned(),
            tts_delay: Duration::ZERO,
            slow_load: None,
            failing: Vec::new(),
            remaining_failures: Arc::new(Mutex::new(HashMap::new())),
            attempts: Arc::new(Mutex::new(Vec::new())),
            loads: Arc::new(Mutex::new(Vec::new())),
            llm_requests: Arc::new(Mutex::new(Vec::new())),
            directives: Arc::new(Mutex::new(Vec::new())),
            synth_started: Arc::new(AtomicUsize::new(0)),
            live_synthesizers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn transcript(mut self, text: &str) -> Self {
        self.transcript = text.to_owned();
        self
    }

    pub(crate) fn response(mut self, text: &str) -> Self {
        self.response = text.to_owned();
        self
    }

    pub(crate) fn tts_delay(mut self, delay: Duration) -> Self {
        self.tts_delay = delay;
        self
    }

    /// Loads of `kind` take `delay` before returning.
    pub(crate) fn slow_load(mut self, kind: ModelKind, delay: Duration) -> Self {
        self.slow_load = Some((kind, delay));
        self
    }

    /// Every load of `kind` fails.
    pub(crate) fn failing(mut self, kind: ModelKind) -> Self {
        self.failing.push(kind);
        self
    }

    /// The first `count` loads of `kind` fail, later ones succeed.
    pub(crate) fn failing_first(self, kind: ModelKind, count: usize) -> Self {
        self.remaining_failures.lock().unwrap().insert(kind, count);
        self
    }

    pub(crate) fn load_count(&self, kind: ModelKind) -> usize {
        count_of(&self.loads, kind)
    }

    /// Loads of `kind` started, including ones still running or failed.
    pub(crate) fn attempt_count(&self, kind: ModelKind) -> usize {
        count_of(&self.attempts, kind)
    }

    /// Synthesizer instances created and not yet dropped.
    pub(crate) fn live_synthesizers(&self) -> usize {
        self.live_synthesizers.load(Ordering::SeqCst)
    }

    pub(crate) fn llm_requests(&self) -> Vec<Vec<ChatMessage>> {
        self.llm_requests.lock().unwrap().clone()
    }

    pub(crate) fn directives(&self) -> Vec<String> {
        self.directives.lock().unwrap().clone()
    }

    pub(crate) fn synth_started(&self) -> usize {
        self.synth_started.load(Ordering::SeqCst)
    }

    /// Registry with built-in detectors and the scripted backends.
    pub(crate) fn registry(&self, config: &SpeechConfig) -> LoaderRegistry {
        let mut registry = LoaderRegistry::with_builtin_detectors(config);

        let transcript = self.transcript.clone();
        registry.register(ModelKind::Stt, move || {
            Ok(ModelHandle::Stt(Arc::new(ScriptedStt {
                transcript: transcript.clone(),
            })))
        });

        let response = self.response.clone();
        let requests = Arc::clone(&self.llm_requests);
        registry.register(ModelKind::Llm, move || {
            Ok(ModelHandle::Llm(Arc::new(ScriptedLlm {
                response: response.clone(),
                requests: Arc::clone(&requests),
            })))
        });

        let delay = self.tts_delay;
        let directives = Arc::clone(&self.directives);
        let started = Arc::clone(&self.synth_started);
        let live = Arc::clone(&self.live_synthesizers);
        registry.register(ModelKind::Tts, move || {
            live.fetch_add(1, Ordering::SeqCst);
            Ok(ModelHandle::Tts(Arc::new(ScriptedTts {
                delay,
                directives: Arc::clone(&directives),
                started: Arc::clone(&started),
                live: Arc::clone(&live),
            })))
        });

        registry
    }
}

fn count_of(kinds: &Mutex<Vec<ModelKind>>, kind: ModelKind) -> usize {
    kinds.lock().unwrap().iter().filter(|k| **k == kind).count()
}

/// Factory wrapper that records every load and injects failures.
struct RecordingFactory {
    inner: LoaderRegistry,
    backends: ScriptedBackends,
}

impl ModelFactory for RecordingFactory {
    fn load(&self, kind: ModelKind) -> Result<ModelHandle> {
        self.backends.attempts.lock().unwrap().push(kind);
        if let Some((slow, delay)) = self.backends.slow_load
            && slow == kind
        {
            std::thread::sleep(delay);
        }
        if self.backends.failing.contains(&kind) {
            return Err(SpeechError::model_load(kind.name(), "scripted failure"));
        }
        {
            let mut remaining = self.backends.remaining_failures.lock().unwrap();
            if let Some(count) = remaining.get_mut(&kind)
                && *count > 0
            {
                *count -= 1;
                return Err(SpeechError::model_load(kind.name(), "transient failure"));
            }
        }
        let handle = self.inner.load(kind)?;
        self.backends.loads.lock().unwrap().push(kind);
        Ok(handle)
    }
}

struct ScriptedStt {
    transcript: String,
}

impl SpeechTranscriber for ScriptedStt {
    fn transcribe(&self, _samples: &[f32], _sample_rate: u32) -> Result<String> {
        Ok(self.transcript.clone())
    }
}

struct ScriptedLlm {
    response: String,
    requests: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
}

impl LanguageModel for ScriptedLlm {
    fn generate(&self, messages: &[ChatMessage], _params: &GenerationParams) -> Result<String> {
        self.requests.lock().unwrap().push(messages.to_vec());
        Ok(self.response.clone())
    }
}

struct ScriptedTts {
    delay: Duration,
    directives: Arc<Mutex<Vec<String>>>,
    started: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
}

impl Drop for ScriptedTts {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SpeechSynthesizer for ScriptedTts {
    fn synthesize(&self, text: &str, voice_directive: &str) -> Result<SynthesizedAudio> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.directives
            .lock()
            .unwrap()
            .push(voice_directive.to_owned());
        let samples = vec![0.05; text.len() * 100];
        Ok(SynthesizedAudio::new(samples, 24_000))
    }
}

/// A wired orchestrator plus everything a test inspects.
pub(crate) struct Harness {
    pub(crate) orchestrator: ConversationTurnOrchestrator,
    pub(crate) manager: Arc<ModelLifecycleManager>,
    pub(crate) memory: Arc<AccountedMemory>,
    pub(crate) events: mpsc::UnboundedReceiver<RuntimeEvent>,
    pub(crate) backends: ScriptedBackends,
}

impl Harness {
    /// Drain all pending events into a Vec.
    pub(crate) fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub(crate) fn harness(backends: ScriptedBackends, config: SpeechConfig) -> Harness {
    let factory = RecordingFactory {
        inner: backends.registry(&config),
        backends: backends.clone(),
    };
    let memory = Arc::new(AccountedMemory::new());
    let manager = Arc::new(ModelLifecycleManager::new(
        Arc::new(factory),
        Arc::clone(&memory) as Arc<dyn DeviceMemory>,
        &config.memory,
    ));
    let (tx, events) = mpsc::unbounded_channel();
    let orchestrator =
        ConversationTurnOrchestrator::new(Arc::clone(&manager), &config, TEST_SYSTEM_PROMPT)
            .with_events(tx);
    Harness {
        orchestrator,
        manager,
        memory,
        events,
        backends,
    }
}

/// Harness with default backends and configuration, already initialized.
pub(crate) async fn ready_harness() -> Harness {
    let h = harness(ScriptedBackends::new(), SpeechConfig::default());
    h.orchestrator.initialize().await.unwrap();
    h
}

/// One second of speech-level audio at 16 kHz.
pub(crate) fn speech_segment() -> SpeechSegment {
    let samples = (0..16_000)
        .map(|i| 0.3 * (i as f32 * 0.05).sin())
        .collect();
    SpeechSegment::new(samples, 16_000)
}

/// `secs` of silence at 16 kHz.
pub(crate) fn silence(secs: f32) -> SpeechSegment {
    SpeechSegment::new(vec![0.0; (16_000.0 * secs) as usize], 16_000)
}
