//! Tool executor trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world: run shell
//! commands, read/write files, search the web, etc. The engine in
//! `ferrocode-tools` dispatches batches of calls against registered
//! executors, honoring each executor's concurrency-safety declaration.

use crate::error::ToolError;
use crate::message::{ToolCall, ToolCallResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// A tool definition sent to the LLM so it knows what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Always "function" for current providers
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: ToolSchema,
}

/// The function schema half of a tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped parameter description the LLM reads
    pub parameters: serde_json::Value,
}

impl Tool {
    /// Build a function-typed tool definition.
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".into(),
            function: ToolSchema {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// The core tool executor trait.
///
/// Each tool (bash, read, write, grep, web_fetch, …) implements this trait
/// and is registered with the engine at construction. `concurrency_safe()`
/// is cached at registration — toggling it between calls is undefined
/// behavior.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// The unique name of this tool (e.g. "read", "bash").
    fn name(&self) -> &str;

    /// Execute the tool. Soft failures (missing file, no matches) return
    /// `Ok` with `success == false`; argument and infrastructure problems
    /// return `Err` and are converted to failed results by the engine.
    async fn execute(
        &self,
        cancel: CancellationToken,
        call: ToolCall,
    ) -> std::result::Result<ToolCallResult, ToolError>;

    /// The definition sent to the LLM.
    fn definition(&self) -> Tool;

    /// Whether this tool's side effects permit parallel execution with
    /// other concurrency-safe tools.
    fn concurrency_safe(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ToolExecutor for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(
            &self,
            _cancel: CancellationToken,
            call: ToolCall,
        ) -> std::result::Result<ToolCallResult, ToolError> {
            Ok(ToolCallResult::ok(call.function.arguments))
        }

        fn definition(&self) -> Tool {
            Tool::function(
                "echo",
                "Echoes back the input",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" }
                    },
                    "required": ["text"]
                }),
            )
        }

        fn concurrency_safe(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn executor_roundtrip() {
        let tool = EchoTool;
        let call = ToolCall::function("c1", "echo", r#"{"text":"hi"}"#);
        let result = tool
            .execute(CancellationToken::new(), call)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.content, r#"{"text":"hi"}"#);
    }

    #[test]
    fn definition_serialization() {
        let def = EchoTool.definition();
        let json = serde_json::to_string(&def).unwrap();
        assert!(json.contains(r#""type":"function""#));
        assert!(json.contains("echo"));
        assert_eq!(def.function.parameters["required"][0], "text");
    }
}
