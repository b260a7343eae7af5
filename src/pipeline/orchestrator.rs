//! One conversational turn, end to end.
//!
//! ```text
//! LISTENING → TRANSCRIBED → SPEECH_EMOTION_DETECTED → TEXT_EMOTION_DETECTED
//!   → FUSED → PROMPT_AUGMENTED → RESPONSE_GENERATED → SYNTHESIZED → DELIVERED
//! ```
//!
//! Transient models are held through [`SlotLease`]s scoped to their phase:
//! `stt` + `speech_emotion` while listening, `text_emotion` for the semantic
//! pass, `tts` while speaking. Every lease is dropped before the next phase
//! starts, so emotion models are gone before the LLM runs.
//!
//! Model calls and loads run on the blocking pool so the async scheduler
//! keeps serving other sessions. They cannot be interrupted: a cancelled turn
//! waits for the call in flight to return, then drops its leases, and only
//! then reports the cancellation.

use crate::config::SpeechConfig;
use crate::emotion::{EmotionFusionEngine, EmotionSample, FusedEmotion, PromptAugmenter};
use crate::error::SpeechError;
use crate::llm::{ChatMessage, GenerationParams};
use crate::models::{ModelKind, ModelLifecycleManager, SlotLease};
use crate::personality;
use crate::pipeline::context::ConversationContext;
use crate::pipeline::messages::{SpeechSegment, SynthesizedAudio};
use crate::runtime::{EventSink, RuntimeEvent};
use crate::vad::{self, EnergyVad, VoiceActivityDetector};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Status emitted after a completed turn.
pub const READY_STATUS: &str = "Ready for next turn";

/// Position of a turn in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TurnPhase {
    Listening,
    Transcribed,
    SpeechEmotionDetected,
    TextEmotionDetected,
    Fused,
    PromptAugmented,
    ResponseGenerated,
    Synthesized,
    Delivered,
}

impl TurnPhase {
    const ALL: [TurnPhase; 9] = [
        Self::Listening,
        Self::Transcribed,
        Self::SpeechEmotionDetected,
        Self::TextEmotionDetected,
        Self::Fused,
        Self::PromptAugmented,
        Self::ResponseGenerated,
        Self::Synthesized,
        Self::Delivered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Listening => "listening",
            Self::Transcribed => "transcribed",
            Self::SpeechEmotionDetected => "speech_emotion_detected",
            Self::TextEmotionDetected => "text_emotion_detected",
            Self::Fused => "fused",
            Self::PromptAugmented => "prompt_augmented",
            Self::ResponseGenerated => "response_generated",
            Self::Synthesized => "synthesized",
            Self::Delivered => "delivered",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last phase reached by a turn.
#[derive(Debug, Default)]
struct PhaseTracker(AtomicU8);

impl PhaseTracker {
    fn advance(&self, phase: TurnPhase) {
        self.0.store(phase as u8, Ordering::Release);
        debug!(phase = %phase, "turn phase");
    }

    fn current(&self) -> TurnPhase {
        let index = self.0.load(Ordering::Acquire) as usize;
        TurnPhase::ALL
            .get(index)
            .copied()
            .unwrap_or(TurnPhase::Listening)
    }
}

/// Why a turn ended early. The session always survives.
#[derive(Debug, thiserror::Error)]
pub enum TurnFailure {
    /// No speech in the captured audio.
    #[error("no speech detected in audio")]
    NoAudio,
    /// The transcriber returned nothing.
    #[error("transcript is empty")]
    EmptyTranscript,
    /// The language model returned nothing.
    #[error("language model returned an empty response")]
    EmptyResponse,
    /// The synthesizer returned no samples.
    #[error("synthesis produced no audio")]
    EmptySynthesis,
    /// A model failed to load or a model call failed.
    #[error(transparent)]
    Processing(#[from] SpeechError),
    /// The transport cancelled the turn.
    #[error("turn cancelled")]
    Cancelled,
}

impl TurnFailure {
    /// Human-readable status for the transport.
    pub fn status_message(&self) -> String {
        match self {
            Self::NoAudio => "No audio detected".to_owned(),
            Self::EmptyTranscript => "Could not transcribe audio".to_owned(),
            Self::EmptyResponse => "Could not generate a response".to_owned(),
            Self::EmptySynthesis => "Could not synthesize speech".to_owned(),
            Self::Processing(e) => format!("Processing error: {e}"),
            Self::Cancelled => "Turn cancelled".to_owned(),
        }
    }

    /// `true` for failures caused by a model error rather than empty input
    /// or cancellation.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Processing(_))
    }
}

/// Everything a completed turn produced.
#[derive(Debug, Clone)]
pub struct TurnRecord {
    pub user_text: String,
    pub response: String,
    pub speech_emotion: EmotionSample,
    pub text_emotion: EmotionSample,
    pub emotion: FusedEmotion,
    pub voice_directive: String,
    pub audio: SynthesizedAudio,
}

/// Result of [`ConversationTurnOrchestrator::run_turn`].
#[derive(Debug)]
pub enum TurnOutcome {
    Completed(Box<TurnRecord>),
    Aborted {
        /// Last phase reached before the turn stopped.
        phase: TurnPhase,
        failure: TurnFailure,
    },
}

impl TurnOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn record(&self) -> Option<&TurnRecord> {
        match self {
            Self::Completed(record) => Some(&**record),
            Self::Aborted { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&TurnFailure> {
        match self {
            Self::Completed(_) => None,
            Self::Aborted { failure, .. } => Some(failure),
        }
    }
}

fn join_failure(e: tokio::task::JoinError) -> SpeechError {
    SpeechError::Pipeline(format!("blocking task failed: {e}"))
}

/// Run a model call on the blocking pool.
async fn run_blocking<T, F>(f: F) -> crate::Result<T>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(join_failure)?
}

/// Run a model call on the blocking pool unless `cancel` fires first.
///
/// The outer error is always [`TurnFailure::Cancelled`]. When `cancel` fires
/// mid-call the call is still awaited, and its output (a lease, for loads)
/// dropped, before this returns.
async fn run_cancellable<T, F>(
    cancel: &CancellationToken,
    f: F,
) -> Result<crate::Result<T>, TurnFailure>
where
    F: FnOnce() -> crate::Result<T> + Send + 'static,
    T: Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(TurnFailure::Cancelled);
    }
    let mut task = tokio::task::spawn_blocking(f);
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            let started = Instant::now();
            let abandoned = task.await;
            drop(abandoned);
            debug!(
                waited_ms = started.elapsed().as_millis() as u64,
                "cancelled turn drained in-flight model call"
            );
            Err(TurnFailure::Cancelled)
        }
        joined = &mut task => Ok(joined.map_err(join_failure).and_then(|result| result)),
    }
}

/// Map a detector error to the neutral default; other errors abort.
fn detection_or_neutral(
    source: &'static str,
    result: crate::Result<EmotionSample>,
) -> Result<EmotionSample, TurnFailure> {
    match result {
        Ok(sample) => Ok(sample),
        Err(e) if e.is_detection() => {
            warn!(source, error = %e, "emotion detection failed, using neutral default");
            Ok(EmotionSample::neutral_default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Drives turns against a shared [`ModelLifecycleManager`].
///
/// Holds no per-conversation state; history lives in the caller's
/// [`ConversationContext`].
pub struct ConversationTurnOrchestrator {
    models: Arc<ModelLifecycleManager>,
    fusion: EmotionFusionEngine,
    augmenter: PromptAugmenter,
    system_prompt: String,
    params: GenerationParams,
    max_history_messages: usize,
    frame_ms: u32,
    fallback_vad: Arc<dyn VoiceActivityDetector>,
    concurrent_emotion: bool,
    events: EventSink,
}

impl fmt::Debug for ConversationTurnOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationTurnOrchestrator")
            .field("fusion", &self.fusion)
            .field("params", &self.params)
            .field("concurrent_emotion", &self.concurrent_emotion)
            .finish_non_exhaustive()
    }
}

impl ConversationTurnOrchestrator {
    pub fn new(
        models: Arc<ModelLifecycleManager>,
        config: &SpeechConfig,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            models,
            fusion: EmotionFusionEngine::new(&config.fusion),
            augmenter: PromptAugmenter::from_config(config),
            system_prompt: system_prompt.into(),
            params: GenerationParams::from_config(&config.llm),
            max_history_messages: config.llm.max_history_messages,
            frame_ms: config.vad.frame_ms,
            fallback_vad: Arc::new(EnergyVad::from_config(&config.vad)),
            concurrent_emotion: config.pipeline.concurrent_emotion,
            events: EventSink::default(),
        }
    }

    /// Build with the system prompt named in `[llm] system_prompt_path`.
    pub fn from_config(models: Arc<ModelLifecycleManager>, config: &SpeechConfig) -> Self {
        let prompt = personality::load_system_prompt(config.llm.system_prompt_path.as_deref());
        Self::new(models, config, prompt)
    }

    /// Send [`RuntimeEvent`]s for every turn to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RuntimeEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    /// Replace the prompt augmenter (for example one loaded from a standalone
    /// emotion table file).
    pub fn with_augmenter(mut self, augmenter: PromptAugmenter) -> Self {
        self.augmenter = augmenter;
        self
    }

    pub fn models(&self) -> &Arc<ModelLifecycleManager> {
        &self.models
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Load the persistent models.
    ///
    /// # Errors
    ///
    /// Fails only if the LLM cannot be loaded. A VAD load failure degrades
    /// to the energy detector.
    pub async fn initialize(&self) -> crate::Result<()> {
        let models = Arc::clone(&self.models);
        run_blocking(move || models.load(ModelKind::Llm)).await?;

        let models = Arc::clone(&self.models);
        if let Err(e) = run_blocking(move || models.load(ModelKind::Vad)).await {
            warn!(error = %e, "VAD model unavailable, using energy detector");
        }

        let budget = self.models.check_budget();
        info!(
            usage_gb = budget.usage_gb,
            budget_gb = budget.budget_gb,
            "persistent models ready"
        );
        Ok(())
    }

    /// Release every model, persistent ones included.
    pub fn shutdown(&self) {
        self.models.shutdown();
    }

    /// Run one turn for `segment`.
    ///
    /// On completion the user message, assistant message and fused emotion
    /// are appended to `ctx`; on any abort (including cancellation) `ctx` is
    /// untouched. No transient slot leased by this turn outlives the call.
    ///
    /// Cancel through `cancel`, not by dropping the future: the token path
    /// waits for the model call in flight and releases its slot before
    /// returning, a dropped future cannot.
    pub async fn run_turn(
        &self,
        ctx: &mut ConversationContext,
        segment: SpeechSegment,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let started = Instant::now();
        let tracker = PhaseTracker::default();
        let session = ctx.id();

        let result = self.execute(ctx, segment, &tracker, cancel).await;

        match result {
            Ok(record) => {
                ctx.record_turn(
                    record.user_text.clone(),
                    record.response.clone(),
                    record.emotion.clone(),
                );
                info!(
                    session = %session,
                    turn = ctx.turn_count(),
                    emotion = %record.emotion.primary_emotion,
                    confidence = record.emotion.confidence,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "turn completed"
                );
                self.events.emit(RuntimeEvent::status(READY_STATUS));
                TurnOutcome::Completed(Box::new(record))
            }
            Err(failure) => {
                let phase = tracker.current();
                let message = failure.status_message();
                if failure.is_error() {
                    warn!(session = %session, phase = %phase, error = %failure, "turn aborted");
                    self.events.emit(RuntimeEvent::Error { message });
                } else {
                    info!(session = %session, phase = %phase, reason = %failure, "turn ended early");
                    self.events.emit(RuntimeEvent::Status { message });
                }
                TurnOutcome::Aborted { phase, failure }
            }
        }
    }

    async fn execute(
        &self,
        ctx: &ConversationContext,
        segment: SpeechSegment,
        tracker: &PhaseTracker,
        cancel: &CancellationToken,
    ) -> Result<TurnRecord, TurnFailure> {
        tracker.advance(TurnPhase::Listening);
        let sample_rate = segment.sample_rate;
        let audio: Arc<[f32]> = self.trim_to_speech(segment, cancel).await?.into();

        // Listening: stt + speech_emotion.
        let stt = self.acquire(ModelKind::Stt, cancel).await?;
        let speech_detector = self.acquire(ModelKind::SpeechEmotion, cancel).await?;

        let transcriber = stt.handle()?.transcriber()?;
        let samples = Arc::clone(&audio);
        let transcript = run_cancellable(cancel, move || {
            transcriber.transcribe(&samples, sample_rate)
        })
        .await??;
        drop(stt);

        let user_text = transcript.trim().to_owned();
        if user_text.is_empty() {
            return Err(TurnFailure::EmptyTranscript);
        }
        tracker.advance(TurnPhase::Transcribed);
        self.events.emit(RuntimeEvent::Transcript {
            text: user_text.clone(),
        });

        let (speech_emotion, text_emotion) = if self.concurrent_emotion
            && self
                .models
                .fits_together(&[ModelKind::SpeechEmotion, ModelKind::TextEmotion])
        {
            let text_detector = self.acquire(ModelKind::TextEmotion, cancel).await?;
            let speech_model = speech_detector.handle()?.speech_emotion()?;
            let text_model = text_detector.handle()?.text_emotion()?;
            let samples = Arc::clone(&audio);
            let text = user_text.clone();
            let (speech, semantic) = tokio::join!(
                run_cancellable(cancel, move || speech_model.detect(&samples, sample_rate)),
                run_cancellable(cancel, move || text_model.detect(&text)),
            );
            drop(speech_detector);
            drop(text_detector);
            let speech = detection_or_neutral("speech", speech?)?;
            tracker.advance(TurnPhase::SpeechEmotionDetected);
            let semantic = detection_or_neutral("text", semantic?)?;
            tracker.advance(TurnPhase::TextEmotionDetected);
            (speech, semantic)
        } else {
            let speech_model = speech_detector.handle()?.speech_emotion()?;
            let samples = Arc::clone(&audio);
            let speech =
                run_cancellable(cancel, move || speech_model.detect(&samples, sample_rate)).await?;
            drop(speech_detector);
            let speech = detection_or_neutral("speech", speech)?;
            tracker.advance(TurnPhase::SpeechEmotionDetected);

            let text_detector = self.acquire(ModelKind::TextEmotion, cancel).await?;
            let text_model = text_detector.handle()?.text_emotion()?;
            let text = user_text.clone();
            let semantic = run_cancellable(cancel, move || text_model.detect(&text)).await?;
            drop(text_detector);
            let semantic = detection_or_neutral("text", semantic)?;
            tracker.advance(TurnPhase::TextEmotionDetected);
            (speech, semantic)
        };
        drop(audio);

        let emotion = self.fusion.fuse(&speech_emotion, &text_emotion);
        tracker.advance(TurnPhase::Fused);
        info!(
            speech = %speech_emotion.label,
            text = %text_emotion.label,
            primary = %emotion.primary_emotion,
            confidence = emotion.confidence,
            agreement = emotion.source_agreement,
            method = %emotion.fusion_method,
            "emotion fused"
        );
        self.events.emit(RuntimeEvent::Emotion(emotion.clone()));

        let system_prompt = self
            .augmenter
            .augment_system_prompt(&self.system_prompt, &emotion);
        let voice_directive = self.augmenter.get_voice_directive(&emotion);
        tracker.advance(TurnPhase::PromptAugmented);

        let history = ctx.recent_messages(self.max_history_messages);
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(user_text.clone()));

        let llm = self.resident(ModelKind::Llm).ok_or_else(|| {
            SpeechError::model_load(ModelKind::Llm.name(), "not resident, initialize() first")
        })?;
        let model = llm.handle()?.language_model()?;
        let params = self.params;
        let response = run_cancellable(cancel, move || model.generate(&messages, &params)).await??;
        drop(llm);

        let response = response.trim().to_owned();
        if response.is_empty() {
            return Err(TurnFailure::EmptyResponse);
        }
        tracker.advance(TurnPhase::ResponseGenerated);
        self.events.emit(RuntimeEvent::Response {
            text: response.clone(),
        });

        let tts = self.acquire(ModelKind::Tts, cancel).await?;
        let synthesizer = tts.handle()?.synthesizer()?;
        let text = response.clone();
        let directive = voice_directive.clone();
        let audio =
            run_cancellable(cancel, move || synthesizer.synthesize(&text, &directive)).await??;
        drop(tts);

        if audio.is_empty() {
            return Err(TurnFailure::EmptySynthesis);
        }
        tracker.advance(TurnPhase::Synthesized);

        self.events.emit(RuntimeEvent::Audio(audio.clone()));
        tracker.advance(TurnPhase::Delivered);

        Ok(TurnRecord {
            user_text,
            response,
            speech_emotion,
            text_emotion,
            emotion,
            voice_directive,
            audio,
        })
    }

    /// Trim leading and trailing non-speech using the resident VAD or the
    /// energy fallback.
    async fn trim_to_speech(
        &self,
        segment: SpeechSegment,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, TurnFailure> {
        if segment.is_empty() {
            return Err(TurnFailure::NoAudio);
        }
        let lease = self.resident(ModelKind::Vad);
        let detector = match &lease {
            Some(lease) => lease.handle()?.voice_activity()?,
            None => Arc::clone(&self.fallback_vad),
        };
        let frame_ms = self.frame_ms;
        let SpeechSegment {
            mut samples,
            sample_rate,
            ..
        } = segment;

        let trimmed = run_cancellable(cancel, move || {
            let bounds = vad::speech_bounds(&*detector, &samples, sample_rate, frame_ms);
            Ok(bounds.map(|range| {
                samples.truncate(range.end);
                samples.drain(..range.start);
                samples
            }))
        })
        .await??;
        drop(lease);

        trimmed.ok_or(TurnFailure::NoAudio)
    }

    /// Lease `kind`, loading it on the blocking pool if needed.
    async fn acquire(
        &self,
        kind: ModelKind,
        cancel: &CancellationToken,
    ) -> Result<SlotLease, TurnFailure> {
        let models = Arc::clone(&self.models);
        run_cancellable(cancel, move || models.acquire(kind))
            .await?
            .map_err(TurnFailure::from)
    }

    /// Lease a persistent slot only if it is already loaded.
    fn resident(&self, kind: ModelKind) -> Option<SlotLease> {
        if !self.models.is_loaded(kind) {
            return None;
        }
        self.models.acquire(kind).ok()
    }
}
