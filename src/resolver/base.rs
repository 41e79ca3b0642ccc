use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use super::http_resolver::HttpResolver;
use crate::config::ResolverConfig;

/// Resolution failures. The message is safe to show to the person logging in.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Could not resolve handle \"{0}\"")]
    HandleNotFound(String),
    #[error("Could not resolve DID \"{0}\"")]
    DidNotFound(String),
    #[error("Unsupported DID \"{0}\"")]
    UnsupportedDid(String),
    #[error("Malformed DID document for \"{0}\"")]
    MalformedDocument(String),
    /// Transport failure. The detail is kept for logs and never displayed.
    #[error("Identity lookup failed")]
    Http(String),
}

/// What a DID resolves to.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub did: String,
    /// Only set when the handle claimed by the DID document resolves back to
    /// the same DID.
    pub handle: Option<String>,
    /// The account's PDS (`#atproto_pds` service endpoint).
    pub pds: Option<String>,
}

/// Maps handles to DIDs and DIDs back to identities.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve_handle(&self, handle: &str) -> Result<String, ResolveError>;
    async fn resolve_did(&self, did: &str) -> Result<ResolvedIdentity, ResolveError>;
}

/// Builds the uncached base resolver during bootstrap.
pub trait BaseResolverFactory: Send + Sync {
    fn create(&self, config: &ResolverConfig) -> Result<Arc<dyn IdentityResolver>, ResolveError>;
}

/// Produces an [`HttpResolver`].
pub struct HttpResolverFactory;

impl BaseResolverFactory for HttpResolverFactory {
    fn create(&self, config: &ResolverConfig) -> Result<Arc<dyn IdentityResolver>, ResolveError> {
        Ok(Arc::new(HttpResolver::new(config)?))
    }
}
