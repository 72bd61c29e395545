//! The tool engine — dispatches batches of tool calls against registered
//! executors.
//!
//! Dispatch contract:
//! 1. Calls naming an unknown tool produce a failed result at their
//!    original index.
//! 2. Resolved calls are partitioned by `concurrency_safe()`: the safe
//!    group runs in parallel under a global semaphore, the rest run
//!    sequentially afterwards in original order.
//! 3. The returned list always matches the input length and index order.
//! 4. Per-tool timeouts derive child deadlines; expiry yields a failed
//!    result, never a crash.
//! 5. Panics inside a tool are isolated and converted to failed results.

use crate::task::TodoStore;
use crate::{file, search, system, task, web, BUILTIN_TOOLS};
use ferrocode_core::message::{ToolCall, ToolCallResult};
use ferrocode_core::tool::{Tool, ToolExecutor};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tool engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Width of the global semaphore bounding parallel tool execution
    pub max_concurrency: usize,
    /// Which built-in tools the engine exposes
    pub enabled_tools: Vec<String>,
    /// Per-tool timeout overrides, in milliseconds
    pub timeouts: HashMap<String, u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            enabled_tools: BUILTIN_TOOLS.iter().map(|s| s.to_string()).collect(),
            timeouts: HashMap::new(),
        }
    }
}

pub struct ToolEngine {
    tools: HashMap<String, Arc<dyn ToolExecutor>>,
    /// Concurrency safety is cached at registration; a tool that toggles
    /// the value afterwards gets whatever was cached.
    concurrency_safe: HashMap<String, bool>,
    enabled: Vec<String>,
    semaphore: Arc<Semaphore>,
    timeouts: HashMap<String, Duration>,
}

impl ToolEngine {
    /// Create an engine with the built-in tools from `enabled_tools`
    /// registered. The todo store is scoped to the current working
    /// directory.
    pub fn new(config: EngineConfig) -> Self {
        let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_workspace(config, &workspace)
    }

    /// Create an engine whose workspace-scoped tools (todo store) live
    /// under the given directory.
    pub fn with_workspace(config: EngineConfig, workspace: &std::path::Path) -> Self {
        let max_concurrency = if config.max_concurrency == 0 {
            10
        } else {
            config.max_concurrency
        };

        let mut engine = Self {
            tools: HashMap::new(),
            concurrency_safe: HashMap::new(),
            enabled: Vec::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            timeouts: config
                .timeouts
                .iter()
                .map(|(name, ms)| (name.clone(), Duration::from_millis(*ms)))
                .collect(),
        };

        let todos = Arc::new(TodoStore::for_workspace(workspace));
        for name in &config.enabled_tools {
            match builtin_tool(name, &todos) {
                Some(tool) => {
                    if let Err(e) = engine.register_tool(tool) {
                        warn!(tool = %name, error = %e, "Failed to register builtin tool");
                    }
                }
                None => warn!(tool = %name, "Unknown builtin tool in enabled_tools"),
            }
        }
        info!(count = engine.tools.len(), "Registered builtin tools");

        engine
    }

    /// Register a tool. Fails if a tool with the same name already exists.
    pub fn register_tool(
        &mut self,
        tool: Arc<dyn ToolExecutor>,
    ) -> std::result::Result<(), String> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(format!("tool {name} already registered"));
        }
        self.concurrency_safe.insert(name.clone(), tool.concurrency_safe());
        self.tools.insert(name.clone(), tool);
        self.enabled.push(name);
        Ok(())
    }

    /// Get a registered tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolExecutor>> {
        self.tools.get(name)
    }

    /// All enabled tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<Tool> {
        self.enabled
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Names of all enabled tools.
    pub fn tool_names(&self) -> Vec<String> {
        self.enabled.clone()
    }

    /// Execute a batch of tool calls, returning one result per call at the
    /// call's original index.
    pub async fn execute_tools(
        &self,
        cancel: &CancellationToken,
        calls: &[ToolCall],
    ) -> Vec<ToolCallResult> {
        if calls.is_empty() {
            return Vec::new();
        }

        let mut results: Vec<Option<ToolCallResult>> = (0..calls.len()).map(|_| None).collect();
        let mut parallel: Vec<usize> = Vec::new();
        let mut sequential: Vec<usize> = Vec::new();

        for (i, call) in calls.iter().enumerate() {
            let name = &call.function.name;
            if !self.tools.contains_key(name) {
                results[i] = Some(ToolCallResult::failure(format!("tool {name} not found")));
                continue;
            }
            if self.concurrency_safe.get(name).copied().unwrap_or(false) {
                parallel.push(i);
            } else {
                sequential.push(i);
            }
        }

        // Concurrency-safe group first, in parallel under the semaphore
        if !parallel.is_empty() {
            let futures = parallel.iter().map(|&i| {
                let call = calls[i].clone();
                let cancel = cancel.clone();
                async move { (i, self.execute_with_permit(cancel, call).await) }
            });
            for (i, result) in futures::future::join_all(futures).await {
                results[i] = Some(result);
            }
        }

        // Then the sequential group, in original order
        for &i in &sequential {
            if cancel.is_cancelled() {
                results[i] = Some(ToolCallResult::failure("context cancelled"));
                continue;
            }
            results[i] = Some(self.execute_single(cancel.clone(), calls[i].clone()).await);
        }

        results
            .into_iter()
            .map(|r| r.expect("every call index produces a result"))
            .collect()
    }

    /// Acquire a semaphore permit (cancellably), then execute.
    async fn execute_with_permit(
        &self,
        cancel: CancellationToken,
        call: ToolCall,
    ) -> ToolCallResult {
        if cancel.is_cancelled() {
            return ToolCallResult::failure("context cancelled");
        }

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return ToolCallResult::failure("context cancelled");
            }
            permit = self.semaphore.acquire() => match permit {
                Ok(p) => p,
                Err(_) => return ToolCallResult::failure("context cancelled"),
            },
        };

        let result = self.execute_single(cancel, call).await;
        drop(permit);
        result
    }

    /// Execute one call under its per-tool deadline, isolating panics.
    async fn execute_single(&self, cancel: CancellationToken, call: ToolCall) -> ToolCallResult {
        let name = call.function.name.clone();
        let Some(tool) = self.tools.get(&name) else {
            return ToolCallResult::failure(format!("tool {name} not found"));
        };
        let tool = Arc::clone(tool);
        let timeout = self.timeouts.get(&name).copied();

        let start = std::time::Instant::now();
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { tool.execute(task_cancel, call).await });
        let abort = handle.abort_handle();

        let completed = async {
            match handle.await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => ToolCallResult::failure(e.to_string()),
                Err(join_err) => {
                    ToolCallResult::failure(format!("tool {name} panicked: {join_err}"))
                }
            }
        };
        let deadline = async {
            match timeout {
                Some(dur) => tokio::time::sleep(dur).await,
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                abort.abort();
                ToolCallResult::failure("context cancelled")
            }
            () = deadline => {
                abort.abort();
                ToolCallResult::failure(format!(
                    "tool {name} timed out after {}ms",
                    timeout.map(|d| d.as_millis()).unwrap_or_default()
                ))
            }
            result = completed => result,
        };

        debug!(
            tool = %name,
            duration_ms = start.elapsed().as_millis() as u64,
            success = result.success,
            "Tool executed"
        );
        result
    }
}

/// Construct a built-in tool by name.
fn builtin_tool(name: &str, todos: &Arc<TodoStore>) -> Option<Arc<dyn ToolExecutor>> {
    let tool: Arc<dyn ToolExecutor> = match name {
        "read" => Arc::new(file::ReadTool),
        "write" => Arc::new(file::WriteTool),
        "edit" => Arc::new(file::EditTool),
        "multi_edit" => Arc::new(file::MultiEditTool),
        "glob" => Arc::new(search::GlobTool),
        "grep" => Arc::new(search::GrepTool),
        "ls" => Arc::new(search::LsTool),
        "bash" => Arc::new(system::BashTool),
        "todo_read" => Arc::new(task::TodoReadTool::new(Arc::clone(todos))),
        "todo_write" => Arc::new(task::TodoWriteTool::new(Arc::clone(todos))),
        "web_search" => Arc::new(web::WebSearchTool::new()),
        "web_fetch" => Arc::new(web::WebFetchTool::new()),
        _ => return None,
    };
    Some(tool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ferrocode_core::error::ToolError;
    use std::sync::Mutex;

    fn empty_engine(max_concurrency: usize) -> ToolEngine {
        let dir = tempfile::tempdir().unwrap();
        ToolEngine::with_workspace(
            EngineConfig {
                max_concurrency,
                enabled_tools: vec![],
                timeouts: HashMap::new(),
            },
            dir.path(),
        )
    }

    /// Records execution events into a shared log.
    struct RecorderTool {
        name: String,
        safe: bool,
        delay_ms: u64,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ToolExecutor for RecorderTool {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(
            &self,
            _cancel: CancellationToken,
            _call: ToolCall,
        ) -> std::result::Result<ToolCallResult, ToolError> {
            self.log.lock().unwrap().push(format!("{}:start", self.name));
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.log.lock().unwrap().push(format!("{}:end", self.name));
            Ok(ToolCallResult::ok(self.name.clone()))
        }

        fn definition(&self) -> Tool {
            Tool::function(&self.name, "recorder", serde_json::json!({"type": "object"}))
        }

        fn concurrency_safe(&self) -> bool {
            self.safe
        }
    }

    struct PanicTool;

    #[async_trait]
    impl ToolExecutor for PanicTool {
        fn name(&self) -> &str {
            "panicky"
        }
        async fn execute(
            &self,
            _cancel: CancellationToken,
            _call: ToolCall,
        ) -> std::result::Result<ToolCallResult, ToolError> {
            panic!("deliberate test panic");
        }
        fn definition(&self) -> Tool {
            Tool::function("panicky", "always panics", serde_json::json!({"type": "object"}))
        }
        fn concurrency_safe(&self) -> bool {
            true
        }
    }

    struct SleepyTool;

    #[async_trait]
    impl ToolExecutor for SleepyTool {
        fn name(&self) -> &str {
            "sleepy"
        }
        async fn execute(
            &self,
            _cancel: CancellationToken,
            _call: ToolCall,
        ) -> std::result::Result<ToolCallResult, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolCallResult::ok("finally"))
        }
        fn definition(&self) -> Tool {
            Tool::function("sleepy", "sleeps a long time", serde_json::json!({"type": "object"}))
        }
        fn concurrency_safe(&self) -> bool {
            true
        }
    }

    fn recorder(
        name: &str,
        safe: bool,
        delay_ms: u64,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<dyn ToolExecutor> {
        Arc::new(RecorderTool {
            name: name.into(),
            safe,
            delay_ms,
            log: Arc::clone(log),
        })
    }

    fn call(name: &str) -> ToolCall {
        ToolCall::function(format!("call_{name}"), name, "{}")
    }

    #[tokio::test]
    async fn results_preserve_index_correspondence() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = empty_engine(10);
        engine.register_tool(recorder("alpha", true, 0, &log)).unwrap();
        engine.register_tool(recorder("beta", false, 0, &log)).unwrap();

        let calls = vec![call("beta"), call("missing"), call("alpha")];
        let results = engine
            .execute_tools(&CancellationToken::new(), &calls)
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].content, "beta");
        assert!(!results[1].success);
        assert!(results[1].error.contains("tool missing not found"));
        assert_eq!(results[2].content, "alpha");
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_results() {
        let engine = empty_engine(10);
        let results = engine.execute_tools(&CancellationToken::new(), &[]).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn sequential_tools_run_after_parallel_group() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = empty_engine(10);
        engine.register_tool(recorder("read_a", true, 30, &log)).unwrap();
        engine.register_tool(recorder("read_b", true, 30, &log)).unwrap();
        engine.register_tool(recorder("write_c", false, 0, &log)).unwrap();

        let calls = vec![call("read_a"), call("read_b"), call("write_c")];
        let results = engine
            .execute_tools(&CancellationToken::new(), &calls)
            .await;
        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[2].content, "write_c");

        let events = log.lock().unwrap().clone();
        // The unsafe tool starts only after both safe tools finished
        let write_start = events.iter().position(|e| e == "write_c:start").unwrap();
        let a_end = events.iter().position(|e| e == "read_a:end").unwrap();
        let b_end = events.iter().position(|e| e == "read_b:end").unwrap();
        assert!(write_start > a_end);
        assert!(write_start > b_end);
    }

    #[tokio::test]
    async fn max_concurrency_one_degenerates_to_sequential() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = empty_engine(1);
        engine.register_tool(recorder("one", true, 20, &log)).unwrap();
        engine.register_tool(recorder("two", true, 20, &log)).unwrap();

        engine
            .execute_tools(&CancellationToken::new(), &[call("one"), call("two")])
            .await;

        let events = log.lock().unwrap().clone();
        // With a single permit, no start may interleave before the prior end
        for pair in events.chunks(2) {
            let name = pair[0].split(':').next().unwrap();
            assert_eq!(pair[0], format!("{name}:start"));
            assert_eq!(pair[1], format!("{name}:end"));
        }
    }

    #[tokio::test]
    async fn cancelled_batch_reports_context_cancelled() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = empty_engine(10);
        engine.register_tool(recorder("safe", true, 0, &log)).unwrap();
        engine.register_tool(recorder("unsafe", false, 0, &log)).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let results = engine
            .execute_tools(&cancel, &[call("safe"), call("unsafe")])
            .await;
        assert!(results.iter().all(|r| !r.success));
        assert!(results.iter().all(|r| r.error == "context cancelled"));
    }

    #[tokio::test]
    async fn cancellation_mid_flight_unblocks_slow_tool() {
        let mut engine = empty_engine(10);
        engine.register_tool(Arc::new(SleepyTool)).unwrap();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let start = std::time::Instant::now();
        let results = engine.execute_tools(&cancel, &[call("sleepy")]).await;
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(!results[0].success);
        assert_eq!(results[0].error, "context cancelled");
    }

    #[tokio::test]
    async fn per_tool_timeout_produces_failed_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut timeouts = HashMap::new();
        timeouts.insert("sleepy".to_string(), 50u64);
        let mut engine = ToolEngine::with_workspace(
            EngineConfig {
                max_concurrency: 10,
                enabled_tools: vec![],
                timeouts,
            },
            dir.path(),
        );
        engine.register_tool(Arc::new(SleepyTool)).unwrap();

        let results = engine
            .execute_tools(&CancellationToken::new(), &[call("sleepy")])
            .await;
        assert!(!results[0].success);
        assert!(results[0].error.contains("timed out"));
    }

    #[tokio::test]
    async fn panic_inside_tool_becomes_failed_result() {
        let mut engine = empty_engine(10);
        engine.register_tool(Arc::new(PanicTool)).unwrap();

        let results = engine
            .execute_tools(&CancellationToken::new(), &[call("panicky")])
            .await;
        assert!(!results[0].success);
        assert!(results[0].error.contains("panicked"));

        // The engine survives and keeps executing
        let again = engine
            .execute_tools(&CancellationToken::new(), &[call("panicky")])
            .await;
        assert!(!again[0].success);
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut engine = empty_engine(10);
        engine.register_tool(recorder("dup", true, 0, &log)).unwrap();
        assert!(engine.register_tool(recorder("dup", true, 0, &log)).is_err());
    }

    #[tokio::test]
    async fn builtin_registration_honors_enabled_list() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ToolEngine::with_workspace(
            EngineConfig {
                max_concurrency: 10,
                enabled_tools: vec!["read".into(), "bash".into()],
                timeouts: HashMap::new(),
            },
            dir.path(),
        );
        let defs = engine.definitions();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].function.name, "read");
        assert_eq!(defs[1].function.name, "bash");
    }

    #[tokio::test]
    async fn all_builtins_register() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ToolEngine::with_workspace(EngineConfig::default(), dir.path());
        assert_eq!(engine.definitions().len(), BUILTIN_TOOLS.len());
        for name in BUILTIN_TOOLS {
            assert!(engine.get(name).is_some(), "builtin {name} missing");
        }
    }
}
