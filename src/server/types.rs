use super::error::{FieldError, Validate, validate_session_id};
use crate::chat::{ChatInput, ChatReply};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

impl Validate for ChatRequest {
    fn validate(&self) -> Vec<FieldError> {
        // An empty id means "use the default session".
        let session_id = self.session_id.as_deref().filter(|id| !id.is_empty());
        validate_session_id("body.session_id", session_id)
    }
}

impl From<ChatRequest> for ChatInput {
    fn from(request: ChatRequest) -> Self {
        Self {
            message: request.message,
            session_id: request.session_id,
            instruction: request.instruction,
            model: request.model,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub output: String,
}

impl From<ChatReply> for ChatResponse {
    fn from(reply: ChatReply) -> Self {
        Self {
            session_id: reply.session_id,
            output: reply.output,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Validate for CreateSessionRequest {
    fn validate(&self) -> Vec<FieldError> {
        validate_session_id("body.session_id", self.session_id.as_deref())
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub app: String,
    pub version: String,
}
