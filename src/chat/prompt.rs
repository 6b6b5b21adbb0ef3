use crate::session::SessionContext;
use chrono::{DateTime, SecondsFormat, Utc};

const PERSONA: &str = "\
You are a helpful chat assistant. You can answer questions, help with tasks, and keep track of details the user wants remembered.

# Your Capabilities:
- Answer general knowledge questions
- Help with writing, analysis, and brainstorming
- Read and update session metadata with the get_session_metadata and set_session_metadata tools

# Instructions:
- Be concise and helpful in your responses
- Store facts the user asks you to remember with set_session_metadata
- Use markdown formatting when appropriate
- If you don't know something, say so honestly";

/// System prompt for one run: timestamp, fixed persona, and the session's
/// custom instruction if it has one.
pub fn build_system_prompt(context: &SessionContext, now: DateTime<Utc>) -> String {
    let mut prompt = format!(
        "Current Time: {}\n\n{}",
        now.to_rfc3339_opts(SecondsFormat::Micros, false),
        PERSONA
    );

    if let Some(instruction) = context.instruction() {
        prompt.push_str("\n\nAdditional instructions: ");
        prompt.push_str(instruction);
    }

    prompt
}
