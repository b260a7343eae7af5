//! Per-turn events emitted by the orchestrator for the transport layer.
//!
//! Events are pushed in pipeline order to an optional unbounded channel; a
//! closed or missing receiver is not an error.

use crate::emotion::FusedEmotion;
use crate::pipeline::messages::SynthesizedAudio;
use serde::Serialize;
use tokio::sync::mpsc;

/// What the pipeline is doing "right now".
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// Human-readable progress or abort status ("Ready for next turn",
    /// "No audio detected", ...).
    Status { message: String },
    /// User transcription produced by STT.
    Transcript { text: String },
    /// Fused emotional context for this turn.
    Emotion(FusedEmotion),
    /// Assistant reply text.
    Response { text: String },
    /// Synthesized assistant audio.
    Audio(SynthesizedAudio),
    /// A turn failed; the session stays alive.
    Error { message: String },
}

impl RuntimeEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }
}

/// Optional event sink.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink {
    tx: Option<mpsc::UnboundedSender<RuntimeEvent>>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<RuntimeEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub(crate) fn emit(&self, event: RuntimeEvent) {
        if let Some(tx) = &self.tx {
            // No listener is not an error.
            let _ = tx.send(event);
        }
    }
}
