pub mod base;
pub mod discovery_client;
pub mod metadata;

pub use base::{CallbackSession, ClientSettings, OAuthClient, OAuthClientFactory, OAuthError};
pub use discovery_client::{DiscoveryClient, DiscoveryClientFactory};
pub use metadata::ClientMetadata;
