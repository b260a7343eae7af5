//! Per-conversation history.

use crate::emotion::FusedEmotion;
use crate::error::{Result, SpeechError};
use crate::llm::ChatMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Messages and fused emotions of one conversation.
///
/// Owned by the caller, one per session. The orchestrator appends to it only
/// when a turn completes; an aborted turn leaves it untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    id: Uuid,
    created_at: DateTime<Utc>,
    message_history: Vec<ChatMessage>,
    emotion_history: Vec<FusedEmotion>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Exported form of a conversation.
#[derive(Serialize)]
struct ConversationExport<'a> {
    id: Uuid,
    created_at: DateTime<Utc>,
    exported_at: DateTime<Utc>,
    turns: usize,
    messages: &'a [ChatMessage],
    emotions: &'a [FusedEmotion],
}

impl ConversationContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            message_history: Vec::new(),
            emotion_history: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.message_history
    }

    pub fn emotions(&self) -> &[FusedEmotion] {
        &self.emotion_history
    }

    /// Completed turns.
    pub fn turn_count(&self) -> usize {
        self.emotion_history.len()
    }

    /// Most recent fused emotion, if any turn has completed.
    pub fn last_emotion(&self) -> Option<&FusedEmotion> {
        self.emotion_history.last()
    }

    /// The newest `limit` messages (all of them when `limit` is zero).
    pub(crate) fn recent_messages(&self, limit: usize) -> &[ChatMessage] {
        if limit == 0 || limit >= self.message_history.len() {
            &self.message_history
        } else {
            &self.message_history[self.message_history.len() - limit..]
        }
    }

    pub(crate) fn record_turn(
        &mut self,
        user_text: String,
        response: String,
        emotion: FusedEmotion,
    ) {
        self.message_history.push(ChatMessage::user(user_text));
        self.message_history.push(ChatMessage::assistant(response));
        self.emotion_history.push(emotion);
    }

    /// Export the conversation as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        let export = ConversationExport {
            id: self.id,
            created_at: self.created_at,
            exported_at: Utc::now(),
            turns: self.turn_count(),
            messages: &self.message_history,
            emotions: &self.emotion_history,
        };
        serde_json::to_string_pretty(&export).map_err(|e| SpeechError::Pipeline(e.to_string()))
    }

    /// Write [`to_json`](Self::to_json) output to `path`, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
