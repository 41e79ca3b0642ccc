use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use super::metadata::ClientMetadata;
use crate::resolver::{IdentityResolver, ResolveError};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum OAuthError {
    /// The handle or DID could not be resolved. Its message is user-facing.
    #[error(transparent)]
    Resolver(#[from] ResolveError),
    #[error("invalid callback: {0}")]
    Callback(String),
    #[error("authorization server request failed: {0}")]
    Http(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The identity established by a completed authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackSession {
    pub did: String,
}

/// The protocol client the route handlers drive.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// The client descriptor served at `client-metadata.json`.
    fn client_metadata(&self) -> &ClientMetadata;

    /// Starts an authorization for `handle` and returns where to send the browser.
    async fn authorize(&self, handle: &str, scope: &str) -> Result<Url, OAuthError>;

    /// Completes an authorization from the callback's query parameters.
    async fn callback(&self, params: &HashMap<String, String>)
        -> Result<CallbackSession, OAuthError>;
}

/// What a protocol client is built from once the public URL is frozen.
#[derive(Clone)]
pub struct ClientSettings {
    pub metadata: ClientMetadata,
    pub store: Arc<dyn Store>,
    pub resolver: Arc<dyn IdentityResolver>,
}

/// Builds the protocol client on the first request that gets past the gate.
#[async_trait]
pub trait OAuthClientFactory: Send + Sync {
    async fn build(&self, settings: ClientSettings) -> Result<Arc<dyn OAuthClient>, OAuthError>;
}
