use super::prompt::build_system_prompt;
use crate::{
    Error, Result,
    agent::{AgentDefinition, AgentRunner, ModelSettings, RunSession, StreamEvent, ToolSet},
    session::{ContextStore, DEFAULT_SESSION_ID, SessionContext},
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const AGENT_NAME: &str = "Simple Chat Agent";

#[derive(Debug, Clone, Default)]
pub struct ChatInput {
    pub message: String,
    /// Falls back to [`DEFAULT_SESSION_ID`].
    pub session_id: Option<String>,
    /// Replaces the session's stored instruction when non-empty.
    pub instruction: Option<String>,
    /// Falls back to the orchestrator's default model.
    pub model: Option<String>,
}

impl ChatInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub session_id: String,
    pub output: String,
}

/// A loaded context and built agent, ready to run.
#[derive(Debug)]
pub struct PreparedChat {
    message: String,
    context: SessionContext,
    agent: AgentDefinition,
    session: RunSession,
}

impl PreparedChat {
    pub fn session_id(&self) -> &str {
        &self.context.session_id
    }

    pub fn agent(&self) -> &AgentDefinition {
        &self.agent
    }
}

/// Drives one chat request: load context, build agent, run, persist.
/// A failed run is never persisted.
pub struct ChatOrchestrator {
    store: ContextStore,
    runner: Arc<dyn AgentRunner>,
    default_model: String,
}

impl ChatOrchestrator {
    pub fn new(
        store: ContextStore,
        runner: Arc<dyn AgentRunner>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            runner,
            default_model: default_model.into(),
        }
    }

    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn build_agent(&self, context: &SessionContext, model: &str) -> AgentDefinition {
        AgentDefinition {
            name: AGENT_NAME.to_string(),
            instructions: build_system_prompt(context, Utc::now()),
            model: model.to_string(),
            tools: ToolSet::session_metadata(),
            settings: ModelSettings {
                parallel_tool_calls: true,
            },
        }
    }

    pub async fn prepare(&self, input: ChatInput) -> Result<PreparedChat> {
        let session_id = input
            .session_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| DEFAULT_SESSION_ID.to_string());

        let mut context = self.store.load(&session_id).await?;
        context.apply_instruction(input.instruction.as_deref());

        let model = input
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_model.clone());
        let agent = self.build_agent(&context, &model);
        let session = RunSession::new(
            session_id.clone(),
            self.store.conversation_log_path(&session_id)?,
        );

        debug!(
            "Prepared chat for session {} with model {} and tools {:?}",
            session_id, model, agent.tools
        );

        Ok(PreparedChat {
            message: input.message,
            context,
            agent,
            session,
        })
    }

    /// Non-streaming chat: the full reply is returned once the context
    /// has been saved and the exchange appended to the conversation log.
    pub async fn chat(&self, input: ChatInput) -> Result<ChatReply> {
        let prepared = self.prepare(input).await?;
        self.run(prepared).await
    }

    pub async fn run(&self, prepared: PreparedChat) -> Result<ChatReply> {
        let PreparedChat {
            message,
            mut context,
            agent,
            session,
        } = prepared;

        let result = self
            .runner
            .run(&agent, &session, &message, &mut context)
            .await?;

        self.store.save(&context).await?;
        self.runner.commit(&session, &message, &result).await?;
        info!(
            "Chat for session {} completed in {} turns",
            context.session_id, result.turns
        );

        Ok(ChatReply {
            session_id: context.session_id,
            output: result.final_output,
        })
    }

    /// Streaming chat. Fragments go to `events` as they arrive; the
    /// context is saved once after the stream ends, then
    /// [`StreamEvent::Completed`] is sent. If the receiver goes away
    /// mid-run the context changes are discarded.
    pub async fn run_streamed(
        &self,
        prepared: PreparedChat,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<ChatReply> {
        let PreparedChat {
            message,
            mut context,
            agent,
            session,
        } = prepared;

        let result = match self
            .runner
            .run_streamed(&agent, &session, &message, &mut context, events.clone())
            .await
        {
            Ok(result) => result,
            Err(Error::Cancelled) => {
                warn!(
                    "Client left mid-stream, discarding context changes for session {}",
                    context.session_id
                );
                return Err(Error::Cancelled);
            }
            Err(e) => return Err(e),
        };

        if events.is_closed() {
            warn!(
                "Client left before completion, discarding context changes for session {}",
                context.session_id
            );
            return Err(Error::Cancelled);
        }

        self.store.save(&context).await?;
        self.runner.commit(&session, &message, &result).await?;
        info!(
            "Streamed chat for session {} completed in {} turns",
            context.session_id, result.turns
        );

        // The reply is already saved; a vanished receiver no longer matters.
        if events
            .send(StreamEvent::Completed(result.final_output.clone()))
            .await
            .is_err()
        {
            debug!("Stream receiver closed before completion event");
        }

        Ok(ChatReply {
            session_id: context.session_id,
            output: result.final_output,
        })
    }
}
