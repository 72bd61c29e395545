//! File tools: read, write, edit, multi_edit.

use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::message::{ToolCall, ToolCallResult};
use ferrocode_core::tool::{Tool, ToolExecutor};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

fn parse_args<T: for<'de> Deserialize<'de>>(call: &ToolCall) -> Result<T, ToolError> {
    serde_json::from_str(&call.function.arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("failed to parse arguments: {e}")))
}

// --- read ---

pub struct ReadTool;

#[derive(Deserialize)]
struct ReadParams {
    file_path: String,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    limit: usize,
}

#[async_trait]
impl ToolExecutor for ReadTool {
    fn name(&self) -> &str {
        "read"
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        let params: ReadParams = parse_args(&call)?;

        let content = match tokio::fs::read_to_string(&params.file_path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolCallResult::failure(format!("failed to read file: {e}"))),
        };

        let lines: Vec<&str> = content.split('\n').collect();

        let start = params.offset;
        let end = if params.limit > 0 {
            (start + params.limit).min(lines.len())
        } else {
            lines.len()
        };

        if start >= lines.len() {
            return Ok(ToolCallResult::ok(
                "File is empty or offset is beyond file length",
            ));
        }

        // cat -n style output, line numbers starting at 1
        let mut output = String::new();
        for (i, line) in lines[start..end].iter().enumerate() {
            output.push_str(&format!("{:>6}→{}\n", start + i + 1, line));
        }

        Ok(ToolCallResult::ok(output))
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "read",
            "Reads a file from the local filesystem. The file_path parameter must be an absolute path. \
             By default the whole file is read; pass offset (starting line index) and limit (line count) \
             for long files. Results use cat -n format with line numbers starting at 1.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Absolute path to the file to read"
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Line number to start reading from (optional)"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Number of lines to read (optional)"
                    }
                },
                "required": ["file_path"]
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        true
    }
}

// --- write ---

pub struct WriteTool;

#[derive(Deserialize)]
struct WriteParams {
    file_path: String,
    content: String,
}

#[async_trait]
impl ToolExecutor for WriteTool {
    fn name(&self) -> &str {
        "write"
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        let params: WriteParams = parse_args(&call)?;

        // Force read-then-edit discipline on existing files
        if tokio::fs::try_exists(&params.file_path).await.unwrap_or(false) {
            return Ok(ToolCallResult::failure(
                "file already exists, please use read tool first to check existing content",
            ));
        }

        if let Some(parent) = std::path::Path::new(&params.file_path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return Ok(ToolCallResult::failure(format!(
                        "failed to create parent directory: {e}"
                    )));
                }
            }
        }

        match tokio::fs::write(&params.file_path, &params.content).await {
            Ok(()) => Ok(ToolCallResult::ok(format!(
                "Successfully wrote {} bytes to {}",
                params.content.len(),
                params.file_path
            ))),
            Err(e) => Ok(ToolCallResult::failure(format!("failed to write file: {e}"))),
        }
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "write",
            "Writes a new file to the local filesystem. Fails if the file already exists — \
             read the existing content first and use the edit tool instead.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Absolute path to the file to write. Relative paths are not supported."
                    },
                    "content": {
                        "type": "string",
                        "description": "Content to write to the file"
                    }
                },
                "required": ["file_path", "content"]
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        false
    }
}

// --- edit ---

#[derive(Debug, Clone, Deserialize)]
pub struct EditParams {
    #[serde(default)]
    pub file_path: String,
    pub old_string: String,
    pub new_string: String,
    #[serde(default)]
    pub replace_all: bool,
}

/// Apply one search/replace operation to file content.
///
/// - `old_string == new_string` is rejected.
/// - An empty `old_string` appends `\n{new_string}` at the end.
/// - A non-unique `old_string` without `replace_all` is rejected.
pub fn search_replace(content: &str, params: &EditParams) -> Result<String, String> {
    if params.old_string == params.new_string {
        return Err("old_string and new_string are identical".into());
    }

    if params.old_string.is_empty() {
        return Ok(format!("{}\n{}", content, params.new_string));
    }

    let occurrences = content.matches(&params.old_string).count();
    if occurrences == 0 {
        return Err("old_string not found in file".into());
    }

    if params.replace_all {
        return Ok(content.replace(&params.old_string, &params.new_string));
    }

    if occurrences > 1 {
        return Err(format!(
            "old_string matches {occurrences} locations; provide more context or set replace_all"
        ));
    }

    Ok(content.replacen(&params.old_string, &params.new_string, 1))
}

pub struct EditTool;

#[async_trait]
impl ToolExecutor for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        let params: EditParams = parse_args(&call)?;

        let content = match tokio::fs::read_to_string(&params.file_path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolCallResult::failure(format!("failed to read file: {e}"))),
        };

        let new_content = match search_replace(&content, &params) {
            Ok(c) => c,
            Err(e) => return Ok(ToolCallResult::failure(e)),
        };

        match tokio::fs::write(&params.file_path, &new_content).await {
            Ok(()) => Ok(ToolCallResult::ok(format!(
                "Successfully replaced in {}",
                params.file_path
            ))),
            Err(e) => Ok(ToolCallResult::failure(format!("failed to write file: {e}"))),
        }
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "edit",
            "Replaces exact literal text within a file. old_string must uniquely identify the \
             target — include surrounding context lines, matching whitespace precisely — unless \
             replace_all is set. An empty old_string appends new_string at the end of the file. \
             Always read the file before editing.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Absolute path to the file to edit"
                    },
                    "old_string": {
                        "type": "string",
                        "description": "The exact literal text to replace. Must match uniquely unless replace_all is set; empty string appends at end of file."
                    },
                    "new_string": {
                        "type": "string",
                        "description": "The exact literal text to replace old_string with"
                    },
                    "replace_all": {
                        "type": "boolean",
                        "description": "Replace all occurrences (default: false)"
                    }
                },
                "required": ["file_path", "old_string", "new_string"]
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        false
    }
}

// --- multi_edit ---

pub struct MultiEditTool;

#[derive(Deserialize)]
struct MultiEditParams {
    file_path: String,
    edits: Vec<EditParams>,
}

#[async_trait]
impl ToolExecutor for MultiEditTool {
    fn name(&self) -> &str {
        "multi_edit"
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        let params: MultiEditParams = parse_args(&call)?;

        let mut content = match tokio::fs::read_to_string(&params.file_path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolCallResult::failure(format!("failed to read file: {e}"))),
        };

        // Apply edits in order; abort on first failure without writing
        for (i, edit) in params.edits.iter().enumerate() {
            match search_replace(&content, edit) {
                Ok(next) => content = next,
                Err(e) => {
                    return Ok(ToolCallResult::failure(format!("edit {}: {e}", i + 1)));
                }
            }
        }

        match tokio::fs::write(&params.file_path, &content).await {
            Ok(()) => Ok(ToolCallResult::ok(format!(
                "Successfully applied {} edits in {}",
                params.edits.len(),
                params.file_path
            ))),
            Err(e) => Ok(ToolCallResult::failure(format!("failed to write file: {e}"))),
        }
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "multi_edit",
            "Apply multiple edits to a single file in sequence. Aborts on the first failing edit \
             without modifying the file.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Absolute path to the file to edit"
                    },
                    "edits": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "old_string": { "type": "string", "description": "Text to replace" },
                                "new_string": { "type": "string", "description": "Replacement text" },
                                "replace_all": { "type": "boolean", "description": "Replace all occurrences (default: false)" }
                            },
                            "required": ["old_string", "new_string"]
                        },
                        "description": "Array of edit operations to apply sequentially"
                    }
                },
                "required": ["file_path", "edits"]
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        false
    }
}
