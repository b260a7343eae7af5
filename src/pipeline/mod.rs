//! Conversation turn pipeline.

pub mod context;
pub mod messages;
pub mod orchestrator;

pub use context::ConversationContext;
pub use messages::{SpeechSegment, SynthesizedAudio};
pub use orchestrator::{
    ConversationTurnOrchestrator, READY_STATUS, TurnFailure, TurnOutcome, TurnPhase, TurnRecord,
};
