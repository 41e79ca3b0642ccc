use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::base::{generate_secret, SessionRecord, Store, StoreError, AUTH_STATE_TTL_SECONDS};

/// A process-local store. Used by tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    secret: Option<String>,
    auth_states: HashMap<String, (String, i64)>,
    sessions: HashMap<String, SessionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn migrate(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_or_create_secret(&self) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.secret.get_or_insert_with(generate_secret).clone())
    }

    async fn put_auth_state(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let mut inner = self.inner.lock().await;
        inner
            .auth_states
            .retain(|_, (_, created_at)| now - *created_at <= AUTH_STATE_TTL_SECONDS);
        inner
            .auth_states
            .insert(key.to_string(), (value.to_string(), now));
        Ok(())
    }

    async fn take_auth_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .auth_states
            .remove(key)
            .filter(|(_, created_at)| Utc::now().timestamp() - created_at <= AUTH_STATE_TTL_SECONDS)
            .map(|(value, _)| value))
    }

    async fn load_session(&self, id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let now = Utc::now().timestamp();
        Ok(self
            .inner
            .lock()
            .await
            .sessions
            .get(id)
            .filter(|record| !record.is_expired(now))
            .cloned())
    }

    async fn save_session(&self, id: &str, record: &SessionRecord) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();
        let mut inner = self.inner.lock().await;
        inner.sessions.retain(|_, existing| !existing.is_expired(now));
        inner.sessions.insert(id.to_string(), record.clone());
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<(), StoreError> {
        self.inner.lock().await.sessions.remove(id);
        Ok(())
    }
}
