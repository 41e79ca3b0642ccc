use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::oauth::{ClientSettings, OAuthClient, OAuthClientFactory, OAuthError};
use crate::resolver::IdentityResolver;
use crate::store::Store;

/// The resources bootstrap produced. The protocol client is added later,
/// once the public URL is frozen.
pub struct AppContext {
    pub store: Arc<dyn Store>,
    pub resolver: Arc<dyn IdentityResolver>,
    client: OnceCell<Arc<dyn OAuthClient>>,
}

impl AppContext {
    pub fn new(store: Arc<dyn Store>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            store,
            resolver,
            client: OnceCell::new(),
        }
    }

    pub fn client(&self) -> Option<&Arc<dyn OAuthClient>> {
        self.client.get()
    }

    /// Builds the protocol client on first call. A failed build leaves the
    /// cell empty so the next request tries again.
    pub async fn get_or_build_client(
        &self,
        factory: &dyn OAuthClientFactory,
        settings: impl FnOnce() -> ClientSettings,
    ) -> Result<&Arc<dyn OAuthClient>, OAuthError> {
        self.client
            .get_or_try_init(|| async move { factory.build(settings()).await })
            .await
    }
}
