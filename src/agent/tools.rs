//! Functions the agent may call mid-run. They only touch the in-memory
//! [`SessionContext`]; persisting it is the orchestrator's job.

use crate::{Result, llm::Tool, session::SessionContext};
use serde::Deserialize;
use serde_json::{Value, json};
use std::{fmt, sync::Arc};
use tracing::{debug, warn};

pub trait ContextTool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    fn call(&self, context: &mut SessionContext, arguments: Value) -> Result<String>;
}

/// Reads the session metadata as pretty-printed JSON.
pub struct GetSessionMetadata;

impl ContextTool for GetSessionMetadata {
    fn name(&self) -> &'static str {
        "get_session_metadata"
    }

    fn description(&self) -> &'static str {
        "Get the session metadata from the context. Returns the metadata as a JSON string."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    fn call(&self, context: &mut SessionContext, _arguments: Value) -> Result<String> {
        Ok(serde_json::to_string_pretty(&context.metadata)?)
    }
}

/// Inserts or overwrites one metadata entry.
pub struct SetSessionMetadata;

#[derive(Deserialize)]
struct SetMetadataArgs {
    key: String,
    value: String,
}

impl ContextTool for SetSessionMetadata {
    fn name(&self) -> &'static str {
        "set_session_metadata"
    }

    fn description(&self) -> &'static str {
        "Set a key-value pair in the session metadata."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {"type": "string", "description": "The metadata key."},
                "value": {"type": "string", "description": "The metadata value."}
            },
            "required": ["key", "value"],
            "additionalProperties": false
        })
    }

    fn call(&self, context: &mut SessionContext, arguments: Value) -> Result<String> {
        let args: SetMetadataArgs = serde_json::from_value(arguments)?;
        let reply = format!("Metadata key '{}' set successfully.", args.key);
        context.metadata.insert(args.key, args.value);
        Ok(reply)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

/// Named collection of tools handed to the runtime with an agent.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn ContextTool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The read/write pair over session metadata.
    pub fn session_metadata() -> Self {
        Self::new()
            .with(GetSessionMetadata)
            .with(SetSessionMetadata)
    }

    pub fn with(mut self, tool: impl ContextTool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn definitions(&self) -> Vec<Tool> {
        self.tools
            .iter()
            .map(|t| Tool::function(t.name(), t.description(), t.parameters()))
            .collect()
    }

    /// Runs the named tool. Failures come back as error output for the
    /// model to read instead of aborting the run.
    pub fn invoke(
        &self,
        name: &str,
        raw_arguments: &str,
        context: &mut SessionContext,
    ) -> ToolOutput {
        let Some(tool) = self.tools.iter().find(|t| t.name() == name) else {
            warn!("Model requested unknown tool: '{}'", name);
            return ToolOutput {
                content: format!(
                    "Error: Unknown tool '{}'. Available tools: {}",
                    name,
                    self.names().join(", ")
                ),
                is_error: true,
            };
        };

        let arguments = if raw_arguments.trim().is_empty() {
            Ok(Value::Object(Default::default()))
        } else {
            serde_json::from_str(raw_arguments)
        };

        let result = arguments
            .map_err(crate::Error::from)
            .and_then(|args| tool.call(context, args));

        match result {
            Ok(content) => {
                debug!("Tool '{}' executed successfully", name);
                ToolOutput {
                    content,
                    is_error: false,
                }
            }
            Err(e) => {
                warn!("Tool '{}' execution failed: {}", name, e);
                ToolOutput {
                    content: format!("Error: Tool '{}' failed: {}", name, e),
                    is_error: true,
                }
            }
        }
    }
}

impl fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
