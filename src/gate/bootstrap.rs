use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::context::AppContext;
use super::runtime::RuntimeConfig;
use crate::config::{ResolverConfig, StoreConfig};
use crate::resolver::{create_resolver, BaseResolverFactory, IdentityResolver, ResolveError};
use crate::store::{Store, StoreError, StoreOpener};

/// Why the middleware could not start. Every request after the failure
/// observes the same value.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to open store: {0}")]
    Open(#[source] StoreError),
    #[error("store migration failed: {0}")]
    Migrate(#[source] StoreError),
    #[error("failed to load cookie secret: {0}")]
    Secret(#[source] StoreError),
    #[error("failed to create identity resolver: {0}")]
    Resolver(#[source] ResolveError),
    #[error("bootstrap ended without completing")]
    Aborted,
}

/// Where bootstrap is. `Ready` and `Failed` are terminal.
#[derive(Clone)]
pub enum BootstrapState {
    Pending,
    Ready(Arc<AppContext>),
    Failed(Arc<BootstrapError>),
}

impl BootstrapState {
    pub fn is_pending(&self) -> bool {
        matches!(self, BootstrapState::Pending)
    }
}

/// What bootstrap needs besides the runtime config.
pub(crate) struct BootstrapDeps {
    pub store_opener: Arc<dyn StoreOpener>,
    pub resolver_factory: Arc<dyn BaseResolverFactory>,
    pub store_config: StoreConfig,
    pub resolver_config: ResolverConfig,
}

/// Opens and migrates the store, loads the cookie secret if none was
/// configured, then builds the caching identity resolver.
pub(crate) async fn bootstrap(
    deps: BootstrapDeps,
    runtime: &RuntimeConfig,
) -> Result<AppContext, BootstrapError> {
    let store = deps
        .store_opener
        .open(&deps.store_config)
        .await
        .map_err(BootstrapError::Open)?;

    match prepare(&deps, store.as_ref(), runtime).await {
        Ok(resolver) => Ok(AppContext::new(store, resolver)),
        Err(e) => {
            store.close().await;
            Err(e)
        }
    }
}

async fn prepare(
    deps: &BootstrapDeps,
    store: &dyn Store,
    runtime: &RuntimeConfig,
) -> Result<Arc<dyn IdentityResolver>, BootstrapError> {
    store.migrate().await.map_err(BootstrapError::Migrate)?;
    debug!("Store migrated");

    if runtime.cookie_secret().is_none() {
        let secret = store
            .get_or_create_secret()
            .await
            .map_err(BootstrapError::Secret)?;
        runtime.set_cookie_secret(secret);
        info!("Using persisted cookie secret");
    }

    let base = deps
        .resolver_factory
        .create(&deps.resolver_config)
        .map_err(BootstrapError::Resolver)?;
    Ok(create_resolver(base, deps.resolver_config.cache_ttl_seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GateConfig;
    use crate::resolver::ResolvedIdentity;
    use crate::store::DefaultStoreOpener;
    use async_trait::async_trait;

    struct NullResolver;

    #[async_trait]
    impl IdentityResolver for NullResolver {
        async fn resolve_handle(&self, handle: &str) -> Result<String, ResolveError> {
            Err(ResolveError::HandleNotFound(handle.to_string()))
        }

        async fn resolve_did(&self, did: &str) -> Result<ResolvedIdentity, ResolveError> {
            Err(ResolveError::DidNotFound(did.to_string()))
        }
    }

    struct NullResolverFactory;

    impl BaseResolverFactory for NullResolverFactory {
        fn create(
            &self,
            _config: &ResolverConfig,
        ) -> Result<Arc<dyn IdentityResolver>, ResolveError> {
            Ok(Arc::new(NullResolver))
        }
    }

    struct BrokenFactory;

    impl BaseResolverFactory for BrokenFactory {
        fn create(
            &self,
            _config: &ResolverConfig,
        ) -> Result<Arc<dyn IdentityResolver>, ResolveError> {
            Err(ResolveError::Http("no network".to_string()))
        }
    }

    fn deps(resolver_factory: Arc<dyn BaseResolverFactory>) -> BootstrapDeps {
        BootstrapDeps {
            store_opener: Arc::new(DefaultStoreOpener),
            resolver_factory,
            store_config: StoreConfig::Memory,
            resolver_config: ResolverConfig::default(),
        }
    }

    #[tokio::test]
    async fn generates_secret_when_none_configured() {
        let runtime = RuntimeConfig::new(&GateConfig::default(), "/oauth".to_string());
        bootstrap(deps(Arc::new(NullResolverFactory)), &runtime)
            .await
            .expect("bootstrap should succeed");
        assert_eq!(runtime.cookie_secret().map(str::len), Some(64));
    }

    #[tokio::test]
    async fn static_secret_skips_the_store() {
        let config = GateConfig {
            cookie_secret: Some("configured".to_string()),
            ..GateConfig::default()
        };
        let runtime = RuntimeConfig::new(&config, "/oauth".to_string());
        let ctx = bootstrap(deps(Arc::new(NullResolverFactory)), &runtime)
            .await
            .unwrap();
        assert_eq!(runtime.cookie_secret(), Some("configured"));
        assert!(ctx.client().is_none());
    }

    #[tokio::test]
    async fn resolver_failure_fails_bootstrap() {
        let runtime = RuntimeConfig::new(&GateConfig::default(), "/oauth".to_string());
        let err = bootstrap(deps(Arc::new(BrokenFactory)), &runtime)
            .await
            .err()
            .expect("bootstrap should fail");
        assert!(matches!(err, BootstrapError::Resolver(_)));
    }
}
