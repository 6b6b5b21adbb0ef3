mod orchestrator;
mod prompt;

pub use orchestrator::{ChatInput, ChatOrchestrator, ChatReply, PreparedChat};
pub use prompt::build_system_prompt;
