use async_trait::async_trait;
use cimba::{
    Error, Result,
    llm::{
        ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatCompletionStream,
        ChatMessage, Choice, FunctionCall, LlmClient, ToolCall, ToolCallChunk,
    },
};
use serde_json::Value;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

/// Characters per streamed text fragment.
const CHUNK_CHARS: usize = 4;

/// Scripted LLM: hands out queued assistant messages in order, then the
/// `always` message (if any) forever.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<ChatMessage>>,
    always: Option<ChatMessage>,
    error: Option<String>,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: Vec<ChatMessage>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        }
    }

    pub fn always(reply: ChatMessage) -> Self {
        Self {
            always: Some(reply),
            ..Self::default()
        }
    }

    pub fn with_error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_reply(&self, request: ChatCompletionRequest) -> Result<ChatMessage> {
        self.requests.lock().unwrap().push(request);

        if let Some(ref error) = self.error {
            return Err(Error::llm(error.clone()));
        }

        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return Ok(reply);
        }

        self.always
            .clone()
            .ok_or_else(|| Error::llm("No more mock responses available"))
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn create_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse> {
        let message = self.next_reply(request)?;
        Ok(ChatCompletionResponse {
            id: "chatcmpl-mock".to_string(),
            model: "mock-model".to_string(),
            choices: vec![Choice {
                message,
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        })
    }

    async fn create_chat_completion_stream(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionStream> {
        let message = self.next_reply(request)?;
        let chunks = split_into_chunks(&message);
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }
}

/// Breaks a message into the fragments a streaming API would send: text
/// in small pieces, each tool call as a header plus split arguments.
fn split_into_chunks(message: &ChatMessage) -> Vec<ChatCompletionChunk> {
    let mut chunks = Vec::new();

    let chars: Vec<char> = message.content.chars().collect();
    for piece in chars.chunks(CHUNK_CHARS) {
        chunks.push(ChatCompletionChunk {
            content: Some(piece.iter().collect()),
            ..ChatCompletionChunk::default()
        });
    }

    for (index, call) in message.requested_tool_calls().iter().enumerate() {
        let index = index as u32;
        let arguments = &call.function.arguments;
        let split = arguments
            .char_indices()
            .nth(arguments.chars().count() / 2)
            .map(|(i, _)| i)
            .unwrap_or(arguments.len());

        chunks.push(ChatCompletionChunk {
            tool_calls: vec![ToolCallChunk {
                index,
                id: Some(call.id.clone()),
                name: Some(call.function.name.clone()),
                arguments: Some(arguments[..split].to_string()),
            }],
            ..ChatCompletionChunk::default()
        });
        chunks.push(ChatCompletionChunk {
            tool_calls: vec![ToolCallChunk {
                index,
                id: None,
                name: None,
                arguments: Some(arguments[split..].to_string()),
            }],
            ..ChatCompletionChunk::default()
        });
    }

    chunks.push(ChatCompletionChunk {
        finish_reason: Some("stop".to_string()),
        ..ChatCompletionChunk::default()
    });
    chunks
}

pub fn text_reply(content: &str) -> ChatMessage {
    ChatMessage::assistant(content)
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        function: FunctionCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        },
    }
}

pub fn tool_reply(calls: Vec<ToolCall>) -> ChatMessage {
    ChatMessage {
        tool_calls: Some(calls),
        ..ChatMessage::assistant("")
    }
}
