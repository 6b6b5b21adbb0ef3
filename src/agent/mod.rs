mod fsm;
mod runtime;
pub mod tools;

pub use fsm::{RunEvent, RunState, RunStateMachine};
pub use runtime::AgentRuntime;
pub use tools::{ContextTool, GetSessionMetadata, SetSessionMetadata, ToolOutput, ToolSet};

use crate::{Result, session::SessionContext};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Upper bound on LLM calls in a single run, whatever the tools do.
pub const MAX_TURNS: usize = 30;

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub parallel_tool_calls: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            parallel_tool_calls: true,
        }
    }
}

/// Everything the runtime needs to know about the agent it runs.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: ToolSet,
    pub settings: ModelSettings,
}

/// Where a run's conversation lives and how long it may go on.
#[derive(Debug, Clone)]
pub struct RunSession {
    pub session_id: String,
    pub log_path: PathBuf,
    pub max_turns: usize,
}

impl RunSession {
    pub fn new(session_id: impl Into<String>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            session_id: session_id.into(),
            log_path: log_path.into(),
            max_turns: MAX_TURNS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub final_output: String,
    pub turns: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of model text, in arrival order.
    TextDelta(String),
    ToolCall { name: String },
    /// Sent by the driver of the run once the result has been handled.
    Completed(String),
}

/// Runs an agent against a session context. Tools may mutate `context`;
/// saving it is up to the caller.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        agent: &AgentDefinition,
        session: &RunSession,
        input: &str,
        context: &mut SessionContext,
    ) -> Result<RunResult>;

    /// Same as [`run`](Self::run) but forwards text fragments and tool
    /// calls to `events` while running. A closed receiver ends the run
    /// with [`Error::Cancelled`](crate::Error::Cancelled).
    async fn run_streamed(
        &self,
        agent: &AgentDefinition,
        session: &RunSession,
        input: &str,
        context: &mut SessionContext,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<RunResult>;

    /// Appends the user input and final output of a finished run to the
    /// session's conversation log. Runs themselves never write the log.
    async fn commit(&self, session: &RunSession, input: &str, result: &RunResult) -> Result<()>;
}
