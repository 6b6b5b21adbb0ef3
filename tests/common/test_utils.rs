use super::MockLlmClient;
use cimba::{
    agent::{AgentDefinition, AgentRuntime, ModelSettings, RunSession, ToolSet},
    chat::ChatOrchestrator,
    config::{Config, LlmConfig, SessionsConfig},
    session::ContextStore,
};
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_MODEL: &str = "gpt-test";

/// Create a temporary directory for test files
pub fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test configuration rooted in `dir`
pub fn create_test_config(dir: &TempDir) -> Config {
    Config {
        llm: LlmConfig {
            api_key: "test-api-key".to_string(),
            model: TEST_MODEL.to_string(),
            ..LlmConfig::default()
        },
        sessions: SessionsConfig {
            dir: dir.path().join("sessions").to_string_lossy().to_string(),
        },
        ..Config::default()
    }
}

pub fn create_store(dir: &TempDir) -> ContextStore {
    ContextStore::new(dir.path().join("sessions"))
}

/// Orchestrator over a real runtime and store, with a scripted LLM.
pub fn create_orchestrator(dir: &TempDir, llm: Arc<MockLlmClient>) -> ChatOrchestrator {
    let runtime = Arc::new(AgentRuntime::new(llm));
    ChatOrchestrator::new(create_store(dir), runtime, TEST_MODEL)
}

pub fn create_test_agent() -> AgentDefinition {
    AgentDefinition {
        name: "Test Agent".to_string(),
        instructions: "You are a test agent.".to_string(),
        model: TEST_MODEL.to_string(),
        tools: ToolSet::session_metadata(),
        settings: ModelSettings::default(),
    }
}

pub fn create_test_session(dir: &TempDir, session_id: &str) -> RunSession {
    RunSession::new(session_id, dir.path().join(session_id).join("chat.db"))
}

/// Generate unique session ID for tests
pub fn generate_test_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
