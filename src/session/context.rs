use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Session that chat requests fall back to when the caller names none.
pub const DEFAULT_SESSION_ID: &str = "default";

/// Per-session state visible to tool calls during a run and persisted
/// afterwards as the session's context document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(default)]
    pub session_id: String,
    /// Custom instruction appended to the agent's system prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    /// Replaces the stored instruction, verbatim, unless `instruction` is
    /// absent or empty.
    pub fn apply_instruction(&mut self, instruction: Option<&str>) {
        if let Some(text) = instruction.filter(|t| !t.is_empty()) {
            self.system_prompt = Some(text.to_string());
        }
    }

    pub fn instruction(&self) -> Option<&str> {
        self.system_prompt.as_deref().filter(|t| !t.is_empty())
    }
}

/// Session ids double as directory names, so only a conservative
/// character set is accepted.
pub fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= 128
        && session_id != "."
        && session_id != ".."
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
