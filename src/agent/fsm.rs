use crate::{Error, Result};
use tracing::{debug, warn};

// Run states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    ReadyToCallLlm,
    AwaitingLlmResponse,
    ExecutingTools,
    Done,
    Error,
}

// Run events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEvent {
    ProcessInput,
    LlmRespondedWithContent,
    LlmRequestedTools,
    ToolsExecutionCompleted,
    ErrorOccurred,
}

/// Tracks one agent run. Every `ProcessInput` is one LLM call and
/// counts as a turn; the call that would exceed `max_turns` is refused
/// and the machine ends in `Error`.
#[derive(Debug)]
pub struct RunStateMachine {
    state: RunState,
    turns: usize,
    max_turns: usize,
}

impl RunStateMachine {
    pub fn new(max_turns: usize) -> Self {
        Self {
            state: RunState::ReadyToCallLlm,
            turns: 0,
            max_turns,
        }
    }

    pub fn current_state(&self) -> RunState {
        self.state
    }

    pub fn turns(&self) -> usize {
        self.turns
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, RunState::Done | RunState::Error)
    }

    pub fn transition(&mut self, event: RunEvent) -> Result<()> {
        let old_state = self.state;

        let new_state = match (old_state, event) {
            (RunState::ReadyToCallLlm, RunEvent::ProcessInput) => {
                if self.turns >= self.max_turns {
                    warn!("Run reached the turn limit ({})", self.max_turns);
                    self.state = RunState::Error;
                    return Err(Error::MaxTurnsExceeded {
                        max_turns: self.max_turns,
                    });
                }
                self.turns += 1;
                RunState::AwaitingLlmResponse
            }
            (RunState::AwaitingLlmResponse, RunEvent::LlmRespondedWithContent) => RunState::Done,
            (RunState::AwaitingLlmResponse, RunEvent::LlmRequestedTools) => {
                RunState::ExecutingTools
            }
            (RunState::ExecutingTools, RunEvent::ToolsExecutionCompleted) => {
                RunState::ReadyToCallLlm
            }
            (
                RunState::ReadyToCallLlm
                | RunState::AwaitingLlmResponse
                | RunState::ExecutingTools,
                RunEvent::ErrorOccurred,
            ) => RunState::Error,
            _ => {
                warn!(
                    "Invalid run transition from {:?} with event {:?}",
                    old_state, event
                );
                return Err(Error::fsm(format!(
                    "Invalid transition from {:?} with event {:?}",
                    old_state, event
                )));
            }
        };

        debug!(
            "Run state transition: {:?} -> {:?} (event: {:?}, turn {}/{})",
            old_state, new_state, event, self.turns, self.max_turns
        );
        self.state = new_state;
        Ok(())
    }
}
