use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::{memory_store::MemoryStore, sqlite_store::SqliteStore};
use crate::config::{default_store_path, StoreConfig};

/// Pending authorization requests older than this are treated as absent.
pub const AUTH_STATE_TTL_SECONDS: i64 = 3600;

/// Sessions older than this are treated as absent and pruned on the next write.
pub const SESSION_TTL_SECONDS: i64 = 14 * 24 * 3600;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store at '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to prepare store directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("migration to version {version} failed: {source}")]
    Migration {
        version: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What a cookie session persists between requests.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    pub did: Option<String>,
    pub created_at: i64,
}

impl SessionRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now - self.created_at > SESSION_TTL_SECONDS
    }
}

/// The Store trait abstracts the middleware's persistent state: the cookie
/// secret, in-flight authorization requests and cookie sessions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Brings the schema to the latest version. Safe to call repeatedly.
    async fn migrate(&self) -> Result<(), StoreError>;

    /// Returns the persisted secret, generating it on first use. Concurrent
    /// callers all observe the value of the first writer.
    async fn get_or_create_secret(&self) -> Result<String, StoreError>;

    /// Records a pending authorization request. Expired entries are swept
    /// on the way.
    async fn put_auth_state(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Reads and deletes a pending authorization request.
    async fn take_auth_state(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn load_session(&self, id: &str) -> Result<Option<SessionRecord>, StoreError>;

    /// Upserts a session. Expired sessions are swept on the way.
    async fn save_session(&self, id: &str, record: &SessionRecord) -> Result<(), StoreError>;

    async fn delete_session(&self, id: &str) -> Result<(), StoreError>;

    async fn close(&self) {}
}

/// Opens the storage handle during bootstrap.
#[async_trait]
pub trait StoreOpener: Send + Sync {
    async fn open(&self, config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError>;
}

/// Opens whichever backend the configuration names.
pub struct DefaultStoreOpener;

#[async_trait]
impl StoreOpener for DefaultStoreOpener {
    async fn open(&self, config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
        create_store(config).await
    }
}

/// Creates a concrete store implementation based on the StoreConfig.
pub async fn create_store(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config {
        StoreConfig::Memory => {
            info!("Using in-memory store; sessions will not survive a restart.");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreConfig::Sqlite { path } => {
            let path: PathBuf = path.clone().unwrap_or_else(default_store_path);
            let store = SqliteStore::open(&path).await?;
            info!("Opened SQLite store at {}", path.display());
            Ok(Arc::new(store))
        }
    }
}

/// 32 random bytes, hex encoded.
pub(crate) fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_distinct_hex() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn memory_backend_from_config() {
        let store = create_store(&StoreConfig::Memory)
            .await
            .expect("memory store should open");
        store.migrate().await.expect("migrate is a no-op");
        assert!(store.load_session("nope").await.unwrap().is_none());
    }
}
