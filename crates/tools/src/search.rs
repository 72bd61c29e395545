//! Filesystem search tools: glob, grep, ls.

use crate::grep::{format_results, ContentSearcher, SearchConfig};
use async_trait::async_trait;
use ferrocode_core::error::ToolError;
use ferrocode_core::message::{ToolCall, ToolCallResult};
use ferrocode_core::tool::{Tool, ToolExecutor};
use serde::Deserialize;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

fn parse_args<T: for<'de> Deserialize<'de>>(call: &ToolCall) -> Result<T, ToolError> {
    serde_json::from_str(&call.function.arguments)
        .map_err(|e| ToolError::InvalidArguments(format!("failed to parse arguments: {e}")))
}

// --- glob ---

const GLOB_RESULT_CAP: usize = 10;

pub struct GlobTool;

#[derive(Deserialize)]
struct GlobParams {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl ToolExecutor for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        let params: GlobParams = parse_args(&call)?;

        let search_path = match params.path {
            Some(p) => std::path::PathBuf::from(p),
            None => std::env::current_dir().map_err(|e| ToolError::ExecutionFailed {
                tool_name: "glob".into(),
                reason: format!("failed to get working directory: {e}"),
            })?,
        };

        let full_pattern = search_path.join(&params.pattern).to_string_lossy().to_string();

        let paths = match glob::glob(&full_pattern) {
            Ok(paths) => paths,
            Err(e) => {
                return Ok(ToolCallResult::failure(format!("glob pattern error: {e}")))
            }
        };

        struct Entry {
            path: std::path::PathBuf,
            modified: SystemTime,
            is_dir: bool,
        }

        let mut entries: Vec<Entry> = Vec::new();
        for path in paths.flatten() {
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };
            entries.push(Entry {
                is_dir: metadata.is_dir(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                path,
            });
        }

        // Most recently modified first
        entries.sort_by(|a, b| b.modified.cmp(&a.modified));
        entries.truncate(GLOB_RESULT_CAP);

        let mut output = String::new();
        if entries.is_empty() {
            output.push_str("No files found matching pattern");
        } else {
            output.push_str(&format!("Found {} file(s) matching pattern:\n", entries.len()));
            for entry in &entries {
                let kind = if entry.is_dir { 'd' } else { 'f' };
                output.push_str(&format!("{kind} {}\n", entry.path.display()));
            }
        }

        Ok(ToolCallResult::ok(output))
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "glob",
            "Fast file search by glob pattern against file paths. Use when you know part of a \
             file's path or name. Results are capped at 10, sorted by most recent modification; \
             make the pattern more specific to narrow further.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "pattern": {
                        "type": "string",
                        "description": "Glob pattern to match files (e.g. '**/*.rs')"
                    },
                    "path": {
                        "type": "string",
                        "description": "Directory to search in (optional, defaults to current directory)"
                    }
                },
                "required": ["pattern"]
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        true
    }
}

// --- grep ---

const GREP_RESULT_CAP: usize = 10;
const GREP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GrepTool;

#[derive(Deserialize)]
struct GrepParams {
    query: String,
    #[serde(default)]
    case_sensitive: bool,
    #[serde(default)]
    include_pattern: Option<String>,
    #[serde(default)]
    exclude_pattern: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

#[async_trait]
impl ToolExecutor for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        let params: GrepParams = parse_args(&call)?;

        let mut config = SearchConfig {
            pattern: params.query,
            case_sensitive: params.case_sensitive,
            context_lines: 2,
            max_results: GREP_RESULT_CAP,
            ..SearchConfig::default()
        };
        if let Some(include) = params.include_pattern {
            config.include_patterns = vec![include];
        }
        if let Some(exclude) = params.exclude_pattern {
            config.exclude_patterns = vec![exclude];
        }

        let searcher = match ContentSearcher::new(config) {
            Ok(s) => s,
            Err(e) => return Ok(ToolCallResult::failure(e)),
        };

        let root = std::path::PathBuf::from(params.path.unwrap_or_else(|| ".".into()));
        let results = match tokio::time::timeout(GREP_TIMEOUT, searcher.search(&root)).await {
            Ok(results) => results,
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool_name: "grep".into(),
                    timeout_ms: GREP_TIMEOUT.as_millis() as u64,
                })
            }
        };

        Ok(ToolCallResult::ok(format_results(&results)))
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "grep",
            "Fast exact regex search over text files. Best for finding exact symbol or function \
             names. Results are capped at 10 matches with 2 context lines each. Escape special \
             regex characters ( ) [ ] { } + * ? ^ $ | . \\ when searching for them literally. \
             Use include_pattern/exclude_pattern globs (e.g. '*.rs') to narrow the scope.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The regex pattern to search for"
                    },
                    "case_sensitive": {
                        "type": "boolean",
                        "description": "Whether the search is case sensitive (default: false)"
                    },
                    "include_pattern": {
                        "type": "string",
                        "description": "Glob pattern for files to include (e.g. '*.rs')"
                    },
                    "exclude_pattern": {
                        "type": "string",
                        "description": "Glob pattern for files to exclude"
                    },
                    "path": {
                        "type": "string",
                        "description": "Directory to search in (optional, defaults to current directory)"
                    }
                },
                "required": ["query"]
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        true
    }
}

// --- ls ---

pub struct LsTool;

#[derive(Deserialize)]
struct LsParams {
    path: String,
    #[serde(default)]
    ignore: Vec<String>,
}

#[async_trait]
impl ToolExecutor for LsTool {
    fn name(&self) -> &str {
        "ls"
    }

    async fn execute(
        &self,
        _cancel: CancellationToken,
        call: ToolCall,
    ) -> Result<ToolCallResult, ToolError> {
        let params: LsParams = parse_args(&call)?;

        let metadata = match tokio::fs::metadata(&params.path).await {
            Ok(m) => m,
            Err(e) => {
                return Ok(ToolCallResult::failure(format!("path does not exist: {e}")))
            }
        };
        if !metadata.is_dir() {
            return Ok(ToolCallResult::failure("path is not a directory"));
        }

        let ignore_patterns: Vec<glob::Pattern> = params
            .ignore
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();

        let mut entries = match tokio::fs::read_dir(&params.path).await {
            Ok(e) => e,
            Err(e) => {
                return Ok(ToolCallResult::failure(format!(
                    "failed to read directory: {e}"
                )))
            }
        };

        let mut output = format!("Contents of directory: {}\n\n", params.path);

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();

            if ignore_patterns.iter().any(|p| p.matches(&name)) {
                continue;
            }

            match entry.metadata().await {
                Ok(m) if m.is_dir() => output.push_str(&format!("d {name}/\n")),
                Ok(m) => output.push_str(&format!("f {name} ({} bytes)\n", m.len())),
                Err(_) => output.push_str(&format!("f {name}\n")),
            }
        }

        Ok(ToolCallResult::ok(output))
    }

    fn definition(&self) -> Tool {
        Tool::function(
            "ls",
            "List contents of a directory with size annotations.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Absolute path to the directory to list"
                    },
                    "ignore": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Glob patterns to ignore"
                    }
                },
                "required": ["path"]
            }),
        )
    }

    fn concurrency_safe(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_with(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::function("c1", name, args.to_string())
    }

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn glob_finds_files_sorted_by_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let older = dir.path().join("older.rs");
        let newer = dir.path().join("newer.rs");
        std::fs::write(&older, "a").unwrap();
        std::fs::write(&newer, "b").unwrap();
        let past = SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&older)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let result = GlobTool
            .execute(
                cancel(),
                call_with(
                    "glob",
                    serde_json::json!({"pattern": "*.rs", "path": dir.path()}),
                ),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.content.contains("Found 2 file(s)"));
        let newer_pos = result.content.find("newer.rs").unwrap();
        let older_pos = result.content.find("older.rs").unwrap();
        assert!(newer_pos < older_pos, "newest file should be listed first");
    }

    #[tokio::test]
    async fn glob_caps_results_at_ten() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..15 {
            std::fs::write(dir.path().join(format!("file{i:02}.txt")), "x").unwrap();
        }

        let result = GlobTool
            .execute(
                cancel(),
                call_with(
                    "glob",
                    serde_json::json!({"pattern": "*.txt", "path": dir.path()}),
                ),
            )
            .await
            .unwrap();
        assert!(result.content.contains("Found 10 file(s)"));
    }

    #[tokio::test]
    async fn glob_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        let result = GlobTool
            .execute(
                cancel(),
                call_with(
                    "glob",
                    serde_json::json!({"pattern": "*.nothing", "path": dir.path()}),
                ),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.content.contains("No files found"));
    }

    #[tokio::test]
    async fn grep_tool_finds_and_formats() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("sample.rs"),
            "fn setup() {}\nfn target_fn() {}\nfn teardown() {}",
        )
        .unwrap();

        let result = GrepTool
            .execute(
                cancel(),
                call_with(
                    "grep",
                    serde_json::json!({"query": "target_fn", "path": dir.path()}),
                ),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.content.contains("2:fn target_fn() {}"));
        assert!(result.content.contains("1-fn setup() {}"));
        assert!(result.content.contains("Found 1 matches"));
    }

    #[tokio::test]
    async fn grep_tool_invalid_regex() {
        let result = GrepTool
            .execute(
                cancel(),
                call_with("grep", serde_json::json!({"query": "[broken"})),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.contains("invalid regex"));
    }

    #[tokio::test]
    async fn ls_lists_with_sizes_and_ignores() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keep.txt"), "12345").unwrap();
        std::fs::write(dir.path().join("skip.log"), "x").unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let result = LsTool
            .execute(
                cancel(),
                call_with(
                    "ls",
                    serde_json::json!({"path": dir.path(), "ignore": ["*.log"]}),
                ),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.content.contains("f keep.txt (5 bytes)"));
        assert!(result.content.contains("d subdir/"));
        assert!(!result.content.contains("skip.log"));
    }

    #[tokio::test]
    async fn ls_rejects_files_and_missing_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "x").unwrap();

        let on_file = LsTool
            .execute(cancel(), call_with("ls", serde_json::json!({"path": file})))
            .await
            .unwrap();
        assert!(!on_file.success);
        assert!(on_file.error.contains("not a directory"));

        let missing = LsTool
            .execute(
                cancel(),
                call_with("ls", serde_json::json!({"path": "/definitely/not/here"})),
            )
            .await
            .unwrap();
        assert!(!missing.success);
    }
}
