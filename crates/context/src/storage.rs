//! Session storage contract and factory.

use async_trait::async_trait;
use ferrocode_core::error::StorageError;
use ferrocode_core::session::SessionContext;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported storage backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// One JSON document per session
    Json,
    /// One relational table keyed by session id
    Sqlite,
}

impl Default for StorageType {
    fn default() -> Self {
        StorageType::Sqlite
    }
}

impl std::str::FromStr for StorageType {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "json" => Ok(StorageType::Json),
            "sqlite" => Ok(StorageType::Sqlite),
            other => Err(StorageError::UnsupportedType(other.to_string())),
        }
    }
}

/// The persistence contract consumed by the context manager. The manager
/// writes after every append; implementations must make `save_session`
/// durable before returning.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save_session(
        &self,
        session: &SessionContext,
    ) -> std::result::Result<(), StorageError>;

    async fn load_session(
        &self,
        session_id: &str,
    ) -> std::result::Result<Option<SessionContext>, StorageError>;

    async fn load_all_sessions(
        &self,
    ) -> std::result::Result<HashMap<String, SessionContext>, StorageError>;

    async fn delete_session(&self, session_id: &str) -> std::result::Result<(), StorageError>;

    async fn close(&self) -> std::result::Result<(), StorageError>;
}

/// Create a session storage backend of the given type rooted at `path`.
///
/// For `Json` the path is a directory; for `Sqlite` it is a directory that
/// will contain `sessions.db`.
pub async fn new_session_storage(
    storage_type: StorageType,
    path: &std::path::Path,
) -> std::result::Result<Box<dyn SessionStorage>, StorageError> {
    match storage_type {
        StorageType::Json => Ok(Box::new(crate::json_store::JsonStorage::new(path)?)),
        StorageType::Sqlite => {
            let db_path = path.join("sessions.db");
            Ok(Box::new(
                crate::sqlite_store::SqliteStorage::new(&db_path).await?,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn storage_type_parses() {
        assert_eq!(StorageType::from_str("json").unwrap(), StorageType::Json);
        assert_eq!(
            StorageType::from_str("sqlite").unwrap(),
            StorageType::Sqlite
        );
        assert!(StorageType::from_str("postgres").is_err());
    }

    #[test]
    fn default_is_sqlite() {
        assert_eq!(StorageType::default(), StorageType::Sqlite);
    }
}
