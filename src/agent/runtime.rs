use super::{
    AgentDefinition, AgentRunner, RunResult, RunSession, StreamEvent,
    fsm::{RunEvent, RunStateMachine},
};
use crate::{
    Error, Result,
    history::{ConversationLog, Message},
    llm::{ChatCompletionRequest, ChatMessage, FunctionCall, LlmClient, ToolCall},
    session::SessionContext,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::{collections::BTreeMap, sync::Arc, time::Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// LLM-backed agent runtime: calls the model, executes the tools it
/// asks for against the session context, and loops until the model
/// answers with content or the turn limit is hit.
pub struct AgentRuntime {
    llm_client: Arc<dyn LlmClient>,
}

impl AgentRuntime {
    pub fn new(llm_client: Arc<dyn LlmClient>) -> Self {
        Self { llm_client }
    }

    async fn drive(
        &self,
        agent: &AgentDefinition,
        session: &RunSession,
        input: &str,
        context: &mut SessionContext,
        events: Option<&mpsc::Sender<StreamEvent>>,
    ) -> Result<RunResult> {
        let start_time = Instant::now();
        info!(
            "Running agent '{}' for session {} (model {}, max {} turns)",
            agent.name, session.session_id, agent.model, session.max_turns
        );

        let log = ConversationLog::open(&session.log_path).await?;
        let previous_messages = log.list(&session.session_id).await?;
        debug!(
            "Retrieved {} previous messages for session",
            previous_messages.len()
        );

        let mut messages = Vec::with_capacity(previous_messages.len() + 2);
        if !agent.instructions.is_empty() {
            messages.push(ChatMessage::system(agent.instructions.clone()));
        }
        for msg in previous_messages {
            messages.push(ChatMessage {
                role: msg.role,
                content: msg.content,
                tool_calls: None,
                tool_call_id: None,
            });
        }
        messages.push(ChatMessage::user(input));

        let tools = agent.tools.definitions();
        let mut fsm = RunStateMachine::new(session.max_turns);

        let final_output = loop {
            fsm.transition(RunEvent::ProcessInput)?;

            let request = ChatCompletionRequest {
                model: agent.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                parallel_tool_calls: Some(agent.settings.parallel_tool_calls),
            };

            let llm_start = Instant::now();
            let reply = match events {
                Some(sender) => self.stream_turn(request, sender).await,
                None => self.complete_turn(request).await,
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    error!("LLM call failed on turn {}: {}", fsm.turns(), e);
                    fsm.transition(RunEvent::ErrorOccurred)?;
                    return Err(e);
                }
            };
            debug!("LLM turn {} took {:?}", fsm.turns(), llm_start.elapsed());

            let tool_calls = reply.requested_tool_calls().to_vec();
            if tool_calls.is_empty() {
                fsm.transition(RunEvent::LlmRespondedWithContent)?;
                break reply.content;
            }

            fsm.transition(RunEvent::LlmRequestedTools)?;
            info!("Executing {} tool calls", tool_calls.len());
            messages.push(reply);

            for call in &tool_calls {
                if let Some(sender) = events {
                    emit(
                        sender,
                        StreamEvent::ToolCall {
                            name: call.function.name.clone(),
                        },
                    )
                    .await?;
                }
                let output =
                    agent
                        .tools
                        .invoke(&call.function.name, &call.function.arguments, context);
                messages.push(ChatMessage::tool(call.id.clone(), output.content));
            }

            fsm.transition(RunEvent::ToolsExecutionCompleted)?;
        };

        info!(
            "Agent run finished in {} turns, total duration: {:?}",
            fsm.turns(),
            start_time.elapsed()
        );

        Ok(RunResult {
            final_output,
            turns: fsm.turns(),
        })
    }

    async fn complete_turn(&self, request: ChatCompletionRequest) -> Result<ChatMessage> {
        let response = self.llm_client.create_chat_completion(request).await?;
        if let Some(usage) = &response.usage {
            debug!(
                "Completion {} from {} used {} tokens ({} prompt, {} completion)",
                response.id,
                response.model,
                usage.total_tokens,
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::llm("LLM response has no choices"))?;
        debug!("Completion {} finished: {:?}", response.id, choice.finish_reason);
        Ok(choice.message)
    }

    /// Consumes a streamed completion, forwarding text as it arrives and
    /// reassembling the assistant message (tool-call fragments included).
    async fn stream_turn(
        &self,
        request: ChatCompletionRequest,
        sender: &mpsc::Sender<StreamEvent>,
    ) -> Result<ChatMessage> {
        let mut stream = self
            .llm_client
            .create_chat_completion_stream(request)
            .await?;

        let mut content = String::new();
        let mut calls: BTreeMap<u32, ToolCall> = BTreeMap::new();
        let mut finish_reason = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.finish_reason.is_some() {
                finish_reason = chunk.finish_reason;
            }

            if let Some(delta) = chunk.content.filter(|d| !d.is_empty()) {
                content.push_str(&delta);
                emit(sender, StreamEvent::TextDelta(delta)).await?;
            }

            for part in chunk.tool_calls {
                let call = calls.entry(part.index).or_insert_with(|| ToolCall {
                    id: String::new(),
                    function: FunctionCall {
                        name: String::new(),
                        arguments: String::new(),
                    },
                });
                if let Some(id) = part.id {
                    call.id = id;
                }
                if let Some(name) = part.name {
                    call.function.name.push_str(&name);
                }
                if let Some(arguments) = part.arguments {
                    call.function.arguments.push_str(&arguments);
                }
            }
        }

        debug!("Streamed completion finished: {:?}", finish_reason);
        let tool_calls: Vec<ToolCall> = calls.into_values().collect();
        Ok(ChatMessage {
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            ..ChatMessage::assistant(content)
        })
    }
}

async fn emit(sender: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<()> {
    sender.send(event).await.map_err(|_| Error::Cancelled)
}

#[async_trait]
impl AgentRunner for AgentRuntime {
    async fn run(
        &self,
        agent: &AgentDefinition,
        session: &RunSession,
        input: &str,
        context: &mut SessionContext,
    ) -> Result<RunResult> {
        self.drive(agent, session, input, context, None).await
    }

    async fn run_streamed(
        &self,
        agent: &AgentDefinition,
        session: &RunSession,
        input: &str,
        context: &mut SessionContext,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<RunResult> {
        self.drive(agent, session, input, context, Some(&events))
            .await
    }

    async fn commit(&self, session: &RunSession, input: &str, result: &RunResult) -> Result<()> {
        let log = ConversationLog::open(&session.log_path).await?;
        log.append(&Message::user(session.session_id.clone(), input.to_string()))
            .await?;
        log.append(&Message::assistant(
            session.session_id.clone(),
            result.final_output.clone(),
        ))
        .await?;
        debug!("Appended run for session {} to conversation log", session.session_id);
        Ok(())
    }
}
