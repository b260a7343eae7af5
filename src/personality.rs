//! Base system prompt for the mentor persona.
//!
//! The prompt is read from a plain text file named in `[llm]
//! system_prompt_path`. When no file is configured, or the file is missing
//! or blank, the built-in [`CORE_PROMPT`] is used. Emotion context is added
//! per turn by [`crate::emotion::PromptAugmenter`], never here.

use std::path::Path;
use tracing::{debug, warn};

/// Built-in mentor persona with voice output rules.
pub const CORE_PROMPT: &str = "\
You are a thoughtful philosophical mentor. Help the user think clearly about what they bring to you.\n\
Respond in 1-3 short spoken sentences. Do not use emojis, markdown, or stage directions.\n\
Ask one focused question when the user's intent is unclear.\n\
If you do not know something, say so plainly.";

/// Load the base system prompt from `path`, falling back to [`CORE_PROMPT`].
///
/// Never fails: read errors are logged and the built-in prompt is returned.
pub fn load_system_prompt(path: Option<&Path>) -> String {
    let Some(path) = path else {
        return CORE_PROMPT.to_owned();
    };
    match std::fs::read_to_string(path) {
        Ok(text) if !text.trim().is_empty() => {
            debug!(path = %path.display(), "loaded system prompt");
            text.trim().to_owned()
        }
        Ok(_) => {
            warn!(path = %path.display(), "system prompt file is empty, using built-in prompt");
            CORE_PROMPT.to_owned()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read system prompt, using built-in prompt");
            CORE_PROMPT.to_owned()
        }
    }
}
