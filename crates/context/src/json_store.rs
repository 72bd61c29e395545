//! JSON file session storage — one `session_<id>.json` document per session.
//!
//! Simple, portable, human-inspectable. The filename encodes the session id
//! so lookups never need a scan; bulk loading skips corrupted files with a
//! warning rather than failing the whole load.

use crate::storage::SessionStorage;
use async_trait::async_trait;
use ferrocode_core::error::StorageError;
use ferrocode_core::session::SessionContext;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct JsonStorage {
    storage_path: PathBuf,
}

impl JsonStorage {
    /// Create a JSON store rooted at the given directory, creating it if
    /// missing.
    pub fn new(storage_path: &Path) -> std::result::Result<Self, StorageError> {
        std::fs::create_dir_all(storage_path)
            .map_err(|e| StorageError::Io(format!("failed to create storage directory: {e}")))?;
        Ok(Self {
            storage_path: storage_path.to_path_buf(),
        })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.storage_path.join(format!("session_{session_id}.json"))
    }
}

#[async_trait]
impl SessionStorage for JsonStorage {
    async fn save_session(
        &self,
        session: &SessionContext,
    ) -> std::result::Result<(), StorageError> {
        let path = self.session_path(&session.id);
        let data = serde_json::to_string_pretty(session)
            .map_err(|e| StorageError::Serialization(format!("failed to marshal session: {e}")))?;
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| StorageError::Io(format!("failed to write session file: {e}")))
    }

    async fn load_session(
        &self,
        session_id: &str,
    ) -> std::result::Result<Option<SessionContext>, StorageError> {
        let path = self.session_path(session_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(format!("failed to read session file: {e}"))),
        };

        let session: SessionContext = serde_json::from_str(&content)
            .map_err(|e| StorageError::Serialization(format!("failed to parse session: {e}")))?;
        Ok(Some(session))
    }

    async fn load_all_sessions(
        &self,
    ) -> std::result::Result<HashMap<String, SessionContext>, StorageError> {
        let mut sessions = HashMap::new();

        let mut entries = tokio::fs::read_dir(&self.storage_path)
            .await
            .map_err(|e| StorageError::Io(format!("failed to read storage directory: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("session_") || !name.ends_with(".json") {
                continue;
            }

            let content = match tokio::fs::read_to_string(entry.path()).await {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = %name, error = %e, "Failed to read session file");
                    continue;
                }
            };

            match serde_json::from_str::<SessionContext>(&content) {
                Ok(session) => {
                    debug!(session_id = %session.id, "Loaded session");
                    sessions.insert(session.id.clone(), session);
                }
                Err(e) => {
                    warn!(file = %name, error = %e, "Skipping corrupted session file");
                }
            }
        }

        Ok(sessions)
    }

    async fn delete_session(&self, session_id: &str) -> std::result::Result<(), StorageError> {
        let path = self.session_path(session_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Already absent counts as deleted
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(format!("failed to delete session: {e}"))),
        }
    }

    async fn close(&self) -> std::result::Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrocode_core::message::Message;

    fn sample_session(id: &str) -> SessionContext {
        let mut session = SessionContext::new(id);
        session.push(Message::user("hello"));
        session.push(Message::assistant("hi there"));
        session.compressed_history = "earlier context".into();
        session.metadata.insert("channel".into(), "test".into());
        session.recount_tokens();
        session
    }

    #[tokio::test]
    async fn save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStorage::new(dir.path()).unwrap();

        let session = sample_session("abc-123");
        store.save_session(&session).await.unwrap();

        let loaded = store.load_session("abc-123").await.unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].content, "hello");
        assert_eq!(loaded.messages[1].content, "hi there");
        assert_eq!(loaded.compressed_history, "earlier context");
        assert_eq!(loaded.total_tokens, session.total_tokens);
        assert_eq!(loaded.metadata["channel"], "test");
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStorage::new(dir.path()).unwrap();
        assert!(store.load_session("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_all_skips_corrupted_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStorage::new(dir.path()).unwrap();

        store.save_session(&sample_session("good-1")).await.unwrap();
        store.save_session(&sample_session("good-2")).await.unwrap();
        std::fs::write(dir.path().join("session_bad.json"), "not json").unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "ignore me").unwrap();

        let sessions = store.load_all_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions.contains_key("good-1"));
        assert!(sessions.contains_key("good-2"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStorage::new(dir.path()).unwrap();

        store.save_session(&sample_session("gone")).await.unwrap();
        store.delete_session("gone").await.unwrap();
        assert!(store.load_session("gone").await.unwrap().is_none());

        // Second delete of a missing session is fine
        store.delete_session("gone").await.unwrap();
    }

    #[tokio::test]
    async fn message_order_preserved_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStorage::new(dir.path()).unwrap();

        let mut session = SessionContext::new("ordered");
        for i in 0..10 {
            session.push(Message::user(format!("message {i}")));
        }
        store.save_session(&session).await.unwrap();

        let loaded = store.load_session("ordered").await.unwrap().unwrap();
        for (i, msg) in loaded.messages.iter().enumerate() {
            assert_eq!(msg.content, format!("message {i}"));
        }
    }
}
