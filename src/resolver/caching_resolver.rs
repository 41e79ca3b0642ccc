use std::sync::Arc;

use async_trait::async_trait;
use cached::{Cached, TimedCache};
use tokio::sync::Mutex;
use tracing::debug;

use super::base::{IdentityResolver, ResolveError, ResolvedIdentity};

/// Wraps a base resolver with time-limited caches in both directions.
/// Failures are never cached.
pub struct CachingResolver {
    base: Arc<dyn IdentityResolver>,
    handles: Mutex<TimedCache<String, String>>,
    dids: Mutex<TimedCache<String, ResolvedIdentity>>,
}

impl CachingResolver {
    pub fn new(base: Arc<dyn IdentityResolver>, ttl_seconds: u64) -> Self {
        Self {
            base,
            handles: Mutex::new(TimedCache::with_lifespan(ttl_seconds)),
            dids: Mutex::new(TimedCache::with_lifespan(ttl_seconds)),
        }
    }
}

/// Builds the resolver handed to the protocol client and session lookups.
pub fn create_resolver(base: Arc<dyn IdentityResolver>, ttl_seconds: u64) -> Arc<dyn IdentityResolver> {
    Arc::new(CachingResolver::new(base, ttl_seconds))
}

#[async_trait]
impl IdentityResolver for CachingResolver {
    async fn resolve_handle(&self, handle: &str) -> Result<String, ResolveError> {
        let key = handle.to_ascii_lowercase();
        if let Some(did) = self.handles.lock().await.cache_get(&key) {
            debug!("Handle cache hit for '{}'", key);
            return Ok(did.clone());
        }

        let did = self.base.resolve_handle(&key).await?;
        self.handles.lock().await.cache_set(key, did.clone());
        Ok(did)
    }

    async fn resolve_did(&self, did: &str) -> Result<ResolvedIdentity, ResolveError> {
        if let Some(identity) = self.dids.lock().await.cache_get(did) {
            debug!("DID cache hit for '{}'", did);
            return Ok(identity.clone());
        }

        let identity = self.base.resolve_did(did).await?;
        if let Some(handle) = &identity.handle {
            self.handles
                .lock()
                .await
                .cache_set(handle.clone(), identity.did.clone());
        }
        self.dids
            .lock()
            .await
            .cache_set(did.to_string(), identity.clone());
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingResolver {
        handle_calls: AtomicUsize,
        did_calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityResolver for CountingResolver {
        async fn resolve_handle(&self, handle: &str) -> Result<String, ResolveError> {
            self.handle_calls.fetch_add(1, Ordering::SeqCst);
            match handle {
                "alice.test" => Ok("did:plc:alice".to_string()),
                other => Err(ResolveError::HandleNotFound(other.to_string())),
            }
        }

        async fn resolve_did(&self, did: &str) -> Result<ResolvedIdentity, ResolveError> {
            self.did_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResolvedIdentity {
                did: did.to_string(),
                handle: Some("alice.test".to_string()),
                pds: None,
            })
        }
    }

    #[tokio::test]
    async fn caches_successful_handle_lookups() {
        let base = Arc::new(CountingResolver::default());
        let resolver = CachingResolver::new(base.clone(), 60);

        assert_eq!(resolver.resolve_handle("alice.test").await.unwrap(), "did:plc:alice");
        assert_eq!(resolver.resolve_handle("ALICE.test").await.unwrap(), "did:plc:alice");
        assert_eq!(base.handle_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn does_not_cache_failures() {
        let base = Arc::new(CountingResolver::default());
        let resolver = CachingResolver::new(base.clone(), 60);

        assert!(resolver.resolve_handle("ghost.test").await.is_err());
        assert!(resolver.resolve_handle("ghost.test").await.is_err());
        assert_eq!(base.handle_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn did_lookup_seeds_the_handle_cache() {
        let base = Arc::new(CountingResolver::default());
        let resolver = CachingResolver::new(base.clone(), 60);

        resolver.resolve_did("did:plc:alice").await.unwrap();
        resolver.resolve_did("did:plc:alice").await.unwrap();
        assert_eq!(resolver.resolve_handle("alice.test").await.unwrap(), "did:plc:alice");

        assert_eq!(base.did_calls.load(Ordering::SeqCst), 1);
        assert_eq!(base.handle_calls.load(Ordering::SeqCst), 0);
    }
}
