//! The context manager — owns per-session message logs and enforces the
//! token budget through LLM-assisted compaction.
//!
//! Appends, reads, and compactions are serialized through a manager-level
//! RwLock; reads hand out deep snapshots. The compression LLM call runs
//! with the lock released and re-acquires it before mutating, so reads on
//! the same session proceed while the summary is being generated.

use crate::prompt::PromptManager;
use crate::storage::{new_session_storage, SessionStorage, StorageType};
use ferrocode_core::error::{ContextError, Error, Result};
use ferrocode_core::llm::{LlmClient, LlmRequest};
use ferrocode_core::message::Message;
use ferrocode_core::session::SessionContext;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Context manager configuration.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Messages retained after compaction
    pub history_limit: usize,
    /// Root directory for session storage
    pub storage_path: PathBuf,
    pub storage_type: StorageType,
    /// Filename of the free-form persistent notes blob
    pub persistence_file: String,
    /// Fraction of the context window at which compaction triggers
    pub compression_threshold: f64,
    /// Override for the token budget; defaults to the compression LLM's
    /// configured max_tokens
    pub context_window: Option<usize>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            history_limit: 6,
            storage_path: PathBuf::from("storage"),
            storage_type: StorageType::default(),
            persistence_file: "persistent_context.md".into(),
            compression_threshold: 0.9,
            context_window: None,
        }
    }
}

pub struct ContextManager {
    config: ContextConfig,
    sessions: Arc<RwLock<HashMap<String, SessionContext>>>,
    prompts: Arc<PromptManager>,
    compression_llm: Arc<dyn LlmClient>,
    storage: Box<dyn SessionStorage>,
}

impl ContextManager {
    /// Create a manager, opening storage and loading all persisted sessions.
    pub async fn new(
        config: ContextConfig,
        prompts: Arc<PromptManager>,
        compression_llm: Arc<dyn LlmClient>,
    ) -> Result<Self> {
        let storage = new_session_storage(config.storage_type, &config.storage_path).await?;

        let sessions = match storage.load_all_sessions().await {
            Ok(loaded) => {
                info!(count = loaded.len(), "Loaded sessions from storage");
                loaded
            }
            Err(e) => {
                warn!(error = %e, "Failed to load sessions, starting empty");
                HashMap::new()
            }
        };

        Ok(Self {
            config,
            sessions: Arc::new(RwLock::new(sessions)),
            prompts,
            compression_llm,
            storage,
        })
    }

    /// Append a message to a session (created on first use), recompute the
    /// token estimate, compact if over budget, and persist.
    pub async fn add_message(&self, session_id: &str, message: Message) -> Result<()> {
        let needs_compression = {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .entry(session_id.to_string())
                .or_insert_with(|| SessionContext::new(session_id));

            session.push(message);
            session.recount_tokens();

            let needs = self.over_threshold(session);
            debug!(
                session_id = %session_id,
                total_tokens = session.total_tokens,
                needs_compression = needs,
                "Appended message"
            );

            if !needs {
                Self::enforce_hard_cap(session, self.config.history_limit);
                self.storage.save_session(session).await?;
            }
            needs
        };

        if needs_compression {
            // Compaction failures are not fatal to the append; the next
            // append will retry once the budget is still exceeded.
            if let Err(e) = self.compress_session(session_id).await {
                error!(session_id = %session_id, error = %e, "Failed to compress session history");
            }

            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(session_id) {
                Self::enforce_hard_cap(session, self.config.history_limit);
                self.storage.save_session(session).await?;
            }
        }

        Ok(())
    }

    /// Snapshot of a session's message log. Unknown sessions yield an empty
    /// list; the returned messages are never mutated by later appends.
    pub async fn get_messages(&self, session_id: &str) -> Vec<Message> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    /// Snapshot copy of the full session context.
    pub async fn get_session_context(&self, session_id: &str) -> Result<SessionContext> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::Context(ContextError::SessionNotFound(session_id.to_string())))
    }

    /// Force compaction of a session's history and persist the result.
    pub async fn compress_history(&self, session_id: &str) -> Result<()> {
        {
            let sessions = self.sessions.read().await;
            if !sessions.contains_key(session_id) {
                return Err(Error::Context(ContextError::SessionNotFound(
                    session_id.to_string(),
                )));
            }
        }

        self.compress_session(session_id).await?;

        let sessions = self.sessions.read().await;
        if let Some(session) = sessions.get(session_id) {
            self.storage.save_session(session).await?;
        }
        Ok(())
    }

    /// Read the store-wide persistent notes blob. Missing file → empty.
    pub async fn load_persistent_context(&self) -> Result<String> {
        let path = self.config.storage_path.join(&self.config.persistence_file);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(Error::Internal(format!(
                "failed to read persistent context: {e}"
            ))),
        }
    }

    /// Overwrite the store-wide persistent notes blob.
    pub async fn save_persistent_context(&self, content: &str) -> Result<()> {
        let path = self.config.storage_path.join(&self.config.persistence_file);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Internal(format!("failed to create storage directory: {e}"))
            })?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| Error::Internal(format!("failed to save persistent context: {e}")))
    }

    /// Close the storage backend.
    pub async fn close(&self) -> Result<()> {
        self.storage.close().await?;
        Ok(())
    }

    fn context_window(&self) -> usize {
        self.config
            .context_window
            .unwrap_or(self.compression_llm.config().max_tokens as usize)
    }

    fn over_threshold(&self, session: &SessionContext) -> bool {
        let threshold =
            (self.context_window() as f64 * self.config.compression_threshold).round() as usize;
        threshold > 0 && session.total_tokens > threshold
    }

    /// Stored messages never exceed twice the history limit, compaction or
    /// not.
    fn enforce_hard_cap(session: &mut SessionContext, history_limit: usize) {
        if session.messages.len() > history_limit * 2 {
            let excess = session.messages.len() - history_limit;
            session.messages.drain(..excess);
            session.recount_tokens();
        }
    }

    /// The compaction algorithm. The manager lock is held only while
    /// snapshotting and while applying the summary — not across the
    /// compression LLM call.
    async fn compress_session(&self, session_id: &str) -> Result<()> {
        let (history_text, token_limit) = {
            let sessions = self.sessions.read().await;
            let Some(session) = sessions.get(session_id) else {
                return Err(Error::Context(ContextError::SessionNotFound(
                    session_id.to_string(),
                )));
            };

            // Too little history to be worth summarizing
            if session.messages.len() <= 2 {
                return Ok(());
            }

            let mut text = String::new();
            for msg in &session.messages[..session.messages.len() - 1] {
                text.push_str(&format!("{}: {}\n", msg.role, msg.content));
            }
            (text, self.context_window() / 4)
        };

        let prompt = self.prompts.get_with_data(
            "compression",
            minijinja::context! {
                conversation_history => history_text,
                token_limit => token_limit,
            },
        )?;

        let response = self
            .compression_llm
            .chat(LlmRequest::from_messages(vec![Message::user(prompt)]))
            .await
            .map_err(Error::Llm)?;

        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return Ok(());
        };

        if session.compressed_history.is_empty() {
            session.compressed_history = response.content;
        } else {
            session.compressed_history.push_str("\n\n");
            session.compressed_history.push_str(&response.content);
        }

        let keep = self.config.history_limit;
        if session.messages.len() > keep {
            let excess = session.messages.len() - keep;
            session.messages.drain(..excess);
        }
        session.recount_tokens();

        info!(
            session_id = %session_id,
            total_tokens = session.total_tokens,
            "Compressed session history"
        );
        Ok(())
    }
}
