use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use super::base::{
    generate_secret, SessionRecord, Store, StoreError, AUTH_STATE_TTL_SECONDS, SESSION_TTL_SECONDS,
};

/// Ordered schema steps. The index + 1 is the version each step produces.
const MIGRATIONS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS secrets (
        name TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS auth_states (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        did TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS auth_states_created_at ON auth_states (created_at)",
    "CREATE INDEX IF NOT EXISTS sessions_created_at ON sessions (created_at)",
];

const COOKIE_SECRET_NAME: &str = "cookie";

/// A `Store` backed by a single SQLite file.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file and its parent directory.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Open {
                path: path.display().to_string(),
                source,
            })?;

        Ok(Self { pool })
    }

    async fn current_version(&self) -> Result<i64, StoreError> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;
        let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&self.pool)
            .await?;
        Ok(version.unwrap_or(0))
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        let current = self.current_version().await?;

        for (index, step) in MIGRATIONS.iter().copied().enumerate() {
            let version = index as i64 + 1;
            if version <= current {
                continue;
            }
            let failed = |source| StoreError::Migration { version, source };

            let mut tx = self.pool.begin().await.map_err(failed)?;
            sqlx::query(step).execute(&mut *tx).await.map_err(failed)?;
            sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
                .bind(version)
                .execute(&mut *tx)
                .await
                .map_err(failed)?;
            tx.commit().await.map_err(failed)?;
            info!("Applied store migration {}", version);
        }

        debug!("Store schema at version {}", MIGRATIONS.len());
        Ok(())
    }

    async fn get_or_create_secret(&self) -> Result<String, StoreError> {
        sqlx::query("INSERT INTO secrets (name, value) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(COOKIE_SECRET_NAME)
            .bind(generate_secret())
            .execute(&self.pool)
            .await?;

        let secret: String = sqlx::query_scalar("SELECT value FROM secrets WHERE name = ?")
            .bind(COOKIE_SECRET_NAME)
            .fetch_one(&self.pool)
            .await?;
        Ok(secret)
    }

    async fn put_auth_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let swept = sqlx::query("DELETE FROM auth_states WHERE created_at < ?")
            .bind(now - AUTH_STATE_TTL_SECONDS)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if swept > 0 {
            debug!("Swept {} expired auth states", swept);
        }

        sqlx::query(
            "INSERT INTO auth_states (key, value, created_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, created_at = excluded.created_at",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn take_auth_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("DELETE FROM auth_states WHERE key = ? RETURNING value, created_at")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at: i64 = row.try_get("created_at")?;
        if Utc::now().timestamp() - created_at > AUTH_STATE_TTL_SECONDS {
            debug!("Discarding expired auth state '{}'", key);
            return Ok(None);
        }
        Ok(Some(row.try_get("value")?))
    }

    async fn load_session(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query("SELECT did, created_at FROM sessions WHERE id = ? AND created_at >= ?")
            .bind(id)
            .bind(Utc::now().timestamp() - SESSION_TTL_SECONDS)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(SessionRecord {
                did: row.try_get("did")?,
                created_at: row.try_get("created_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn save_session(&self, id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let swept = sqlx::query("DELETE FROM sessions WHERE created_at < ?")
            .bind(now - SESSION_TTL_SECONDS)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if swept > 0 {
            debug!("Swept {} expired sessions", swept);
        }

        sqlx::query(
            "INSERT INTO sessions (id, did, created_at, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET did = excluded.did, updated_at = excluded.updated_at",
        )
        .bind(id)
        .bind(record.did.as_deref())
        .bind(record.created_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
