use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::base::{IdentityResolver, ResolveError, ResolvedIdentity};
use crate::config::ResolverConfig;

/// Resolves identities over HTTP: handles through XRPC or their well-known
/// document, `did:plc` through the PLC directory and `did:web` through the
/// host's `did.json`.
pub struct HttpResolver {
    client: reqwest::Client,
    plc_directory: String,
    handle_resolver: Option<String>,
}

#[derive(Deserialize, Debug)]
struct DidDocument {
    id: String,
    #[serde(default, rename = "alsoKnownAs")]
    also_known_as: Vec<String>,
    #[serde(default)]
    service: Vec<DidService>,
}

#[derive(Deserialize, Debug)]
struct DidService {
    id: String,
    #[serde(rename = "serviceEndpoint")]
    endpoint: Value,
}

#[derive(Deserialize)]
struct ResolveHandleResponse {
    did: String,
}

impl HttpResolver {
    pub fn new(config: &ResolverConfig) -> Result<Self, ResolveError> {
        info!(
            "Creating HTTP identity resolver (plc directory '{}')",
            config.plc_directory
        );
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_in_ms))
            .user_agent(concat!("atgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                warn!("Failed to build resolver HTTP client: {}", e);
                ResolveError::Http(e.to_string())
            })?;

        Ok(Self {
            client,
            plc_directory: config.plc_directory.trim_end_matches('/').to_string(),
            handle_resolver: config
                .handle_resolver
                .as_ref()
                .map(|s| s.trim_end_matches('/').to_string()),
        })
    }

    fn did_document_url(&self, did: &str) -> Result<String, ResolveError> {
        if did.starts_with("did:plc:") {
            return Ok(format!("{}/{}", self.plc_directory, did));
        }
        if let Some(host) = did.strip_prefix("did:web:") {
            // Path-based did:web identifiers are not used for accounts.
            if host.is_empty() || host.contains(':') {
                return Err(ResolveError::UnsupportedDid(did.to_string()));
            }
            return Ok(format!(
                "https://{}/.well-known/did.json",
                host.replace("%3A", ":")
            ));
        }
        Err(ResolveError::UnsupportedDid(did.to_string()))
    }

    async fn fetch_did_document(&self, did: &str) -> Result<DidDocument, ResolveError> {
        let url = self.did_document_url(did)?;
        debug!("Fetching DID document for {} from {}", did, url);

        let res = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                warn!("DID document request for {} failed: {}", did, e);
                ResolveError::Http(e.to_string())
            })?;
        if !res.status().is_success() {
            debug!("DID document lookup returned {}", res.status());
            return Err(ResolveError::DidNotFound(did.to_string()));
        }

        let doc: DidDocument = res
            .json()
            .await
            .map_err(|_| ResolveError::MalformedDocument(did.to_string()))?;
        if doc.id != did {
            return Err(ResolveError::MalformedDocument(did.to_string()));
        }
        Ok(doc)
    }
}

#[async_trait]
impl IdentityResolver for HttpResolver {
    async fn resolve_handle(&self, handle: &str) -> Result<String, ResolveError> {
        let handle = handle.to_ascii_lowercase();
        let not_found = || ResolveError::HandleNotFound(handle.clone());

        let did = match &self.handle_resolver {
            Some(service) => {
                let url = format!("{}/xrpc/com.atproto.identity.resolveHandle", service);
                let res = self
                    .client
                    .get(&url)
                    .query(&[("handle", handle.as_str())])
                    .send()
                    .await
                    .map_err(|e| {
                        warn!("Handle resolution request for '{}' failed: {}", handle, e);
                        ResolveError::Http(e.to_string())
                    })?;
                if !res.status().is_success() {
                    return Err(not_found());
                }
                res.json::<ResolveHandleResponse>()
                    .await
                    .map_err(|_| not_found())?
                    .did
            }
            None => {
                let url = format!("https://{}/.well-known/atproto-did", handle);
                let res = self
                    .client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|_| not_found())?;
                if !res.status().is_success() {
                    return Err(not_found());
                }
                res.text().await.map_err(|_| not_found())?.trim().to_string()
            }
        };

        if !did.starts_with("did:") {
            return Err(not_found());
        }
        debug!("Resolved handle '{}' to {}", handle, did);
        Ok(did)
    }

    async fn resolve_did(&self, did: &str) -> Result<ResolvedIdentity, ResolveError> {
        let doc = self.fetch_did_document(did).await?;

        let pds = doc
            .service
            .iter()
            .find(|s| s.id.ends_with("#atproto_pds"))
            .and_then(|s| s.endpoint.as_str())
            .map(|s| s.trim_end_matches('/').to_string());

        let claimed = doc
            .also_known_as
            .iter()
            .find_map(|aka| aka.strip_prefix("at://"))
            .map(str::to_ascii_lowercase);

        // The document's claim only counts if the handle points back here.
        let handle = match claimed {
            Some(candidate) => match self.resolve_handle(&candidate).await {
                Ok(back) if back == did => Some(candidate),
                Ok(back) => {
                    debug!("Handle '{}' points to {} instead of {}", candidate, back, did);
                    None
                }
                Err(e) => {
                    debug!("Handle '{}' did not verify: {}", candidate, e);
                    None
                }
            },
            None => None,
        };

        Ok(ResolvedIdentity {
            did: did.to_string(),
            handle,
            pds,
        })
    }
}
