use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

use super::base::{CallbackSession, ClientSettings, OAuthClient, OAuthClientFactory, OAuthError};
use super::metadata::ClientMetadata;
use crate::resolver::{IdentityResolver, ResolveError};
use crate::store::Store;

/// Authorization-code client with PKCE (S256) and authorization server
/// discovery starting from the account's PDS. Uses pushed authorization
/// requests when the server advertises them.
pub struct DiscoveryClient {
    metadata: ClientMetadata,
    store: Arc<dyn Store>,
    resolver: Arc<dyn IdentityResolver>,
    http: reqwest::Client,
}

/// Builds a [`DiscoveryClient`] with the given outbound request timeout.
pub struct DiscoveryClientFactory {
    pub timeout: Duration,
}

impl Default for DiscoveryClientFactory {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl OAuthClientFactory for DiscoveryClientFactory {
    async fn build(&self, settings: ClientSettings) -> Result<Arc<dyn OAuthClient>, OAuthError> {
        Ok(Arc::new(DiscoveryClient::new(settings, self.timeout)?))
    }
}

#[derive(Deserialize)]
struct ProtectedResourceMetadata {
    authorization_servers: Vec<String>,
}

#[derive(Deserialize)]
struct AuthorizationServerMetadata {
    issuer: String,
    authorization_endpoint: String,
    token_endpoint: String,
    #[serde(default)]
    pushed_authorization_request_endpoint: Option<String>,
}

/// Stored under the `state` value between authorize and callback.
#[derive(Serialize, Deserialize)]
struct PendingAuthorization {
    did: String,
    issuer: String,
    token_endpoint: String,
    code_verifier: String,
}

#[derive(Deserialize)]
struct PushedAuthorizationResponse {
    request_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    sub: Option<String>,
}

impl DiscoveryClient {
    pub fn new(settings: ClientSettings, timeout: Duration) -> Result<Self, OAuthError> {
        info!("Creating OAuth client '{}'", settings.metadata.client_id);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("atgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OAuthError::Http(e.to_string()))?;

        Ok(Self {
            metadata: settings.metadata,
            store: settings.store,
            resolver: settings.resolver,
            http,
        })
    }

    fn redirect_uri(&self) -> Result<&str, OAuthError> {
        self.metadata
            .redirect_uri()
            .ok_or_else(|| OAuthError::Http("client metadata has no redirect URI".to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, OAuthError> {
        debug!("GET {}", url);
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| OAuthError::Http(format!("{}: {}", url, e)))?;
        if !res.status().is_success() {
            return Err(OAuthError::Http(format!("{} returned {}", url, res.status())));
        }
        res.json()
            .await
            .map_err(|e| OAuthError::Http(format!("{}: {}", url, e)))
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<T, OAuthError> {
        debug!("POST {}", url);
        let res = self
            .http
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| OAuthError::Http(format!("{}: {}", url, e)))?;
        if !res.status().is_success() {
            return Err(OAuthError::Http(format!("{} returned {}", url, res.status())));
        }
        res.json()
            .await
            .map_err(|e| OAuthError::Http(format!("{}: {}", url, e)))
    }

    /// PDS -> protected resource metadata -> authorization server metadata.
    async fn discover(&self, pds: &str) -> Result<AuthorizationServerMetadata, OAuthError> {
        let resource: ProtectedResourceMetadata = self
            .get_json(&format!("{}/.well-known/oauth-protected-resource", pds))
            .await?;
        let issuer = resource
            .authorization_servers
            .first()
            .map(|s| s.trim_end_matches('/').to_string())
            .ok_or_else(|| OAuthError::Http(format!("{} names no authorization server", pds)))?;

        let server: AuthorizationServerMetadata = self
            .get_json(&format!("{}/.well-known/oauth-authorization-server", issuer))
            .await?;
        if server.issuer.trim_end_matches('/') != issuer {
            return Err(OAuthError::Http(format!(
                "issuer mismatch: expected {}, got {}",
                issuer, server.issuer
            )));
        }
        Ok(server)
    }
}

fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn endpoint_with_params(endpoint: &str, params: &[(&str, &str)]) -> Result<Url, OAuthError> {
    Url::parse_with_params(endpoint, params)
        .map_err(|e| OAuthError::Http(format!("bad authorization endpoint '{}': {}", endpoint, e)))
}

#[async_trait]
impl OAuthClient for DiscoveryClient {
    fn client_metadata(&self) -> &ClientMetadata {
        &self.metadata
    }

    async fn authorize(&self, handle: &str, scope: &str) -> Result<Url, OAuthError> {
        let did = self.resolver.resolve_handle(handle).await?;
        let identity = self.resolver.resolve_did(&did).await?;
        let pds = identity
            .pds
            .ok_or_else(|| ResolveError::MalformedDocument(did.clone()))?;
        let server = self.discover(&pds).await?;

        let state = random_token(16);
        let code_verifier = random_token(32);
        let challenge = code_challenge(&code_verifier);

        let pending = PendingAuthorization {
            did,
            issuer: server.issuer.trim_end_matches('/').to_string(),
            token_endpoint: server.token_endpoint.clone(),
            code_verifier,
        };
        let pending = serde_json::to_string(&pending)
            .map_err(|e| OAuthError::Http(format!("failed to encode state: {}", e)))?;
        self.store.put_auth_state(&state, &pending).await?;

        let client_id = self.metadata.client_id.as_str();
        let params = [
            ("client_id", client_id),
            ("redirect_uri", self.redirect_uri()?),
            ("response_type", "code"),
            ("scope", scope),
            ("state", state.as_str()),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("login_hint", handle),
        ];

        match &server.pushed_authorization_request_endpoint {
            Some(par_endpoint) => {
                let pushed: PushedAuthorizationResponse =
                    self.post_form(par_endpoint, &params).await?;
                endpoint_with_params(
                    &server.authorization_endpoint,
                    &[("client_id", client_id), ("request_uri", pushed.request_uri.as_str())],
                )
            }
            None => endpoint_with_params(&server.authorization_endpoint, &params),
        }
    }

    async fn callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackSession, OAuthError> {
        if let Some(error) = params.get("error") {
            return Err(OAuthError::Callback(format!("authorization failed: {}", error)));
        }
        let code = params
            .get("code")
            .ok_or_else(|| OAuthError::Callback("missing code".to_string()))?;
        let state = params
            .get("state")
            .ok_or_else(|| OAuthError::Callback("missing state".to_string()))?;

        let pending = self
            .store
            .take_auth_state(state)
            .await?
            .ok_or_else(|| OAuthError::Callback("unknown or expired state".to_string()))?;
        let pending: PendingAuthorization = serde_json::from_str(&pending)
            .map_err(|e| OAuthError::Callback(format!("corrupt state: {}", e)))?;

        if let Some(iss) = params.get("iss") {
            if iss.trim_end_matches('/') != pending.issuer {
                return Err(OAuthError::Callback("issuer mismatch".to_string()));
            }
        }

        let token: TokenResponse = self
            .post_form(
                &pending.token_endpoint,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("redirect_uri", self.redirect_uri()?),
                    ("client_id", self.metadata.client_id.as_str()),
                    ("code_verifier", pending.code_verifier.as_str()),
                ],
            )
            .await?;

        match token.sub {
            Some(sub) if sub == pending.did => Ok(CallbackSession { did: sub }),
            _ => Err(OAuthError::Callback("token subject mismatch".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolvedIdentity;
    use crate::store::MemoryStore;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use serde_json::json;

    struct StaticResolver {
        pds: String,
    }

    #[async_trait]
    impl IdentityResolver for StaticResolver {
        async fn resolve_handle(&self, handle: &str) -> Result<String, ResolveError> {
            match handle {
                "alice.test" => Ok("did:plc:alice".to_string()),
                other => Err(ResolveError::HandleNotFound(other.to_string())),
            }
        }

        async fn resolve_did(&self, did: &str) -> Result<ResolvedIdentity, ResolveError> {
            Ok(ResolvedIdentity {
                did: did.to_string(),
                handle: Some("alice.test".to_string()),
                pds: Some(self.pds.clone()),
            })
        }
    }

    /// Mocks are removed when dropped, so callers keep the returned ones.
    async fn discovery_mocks(server: &mut ServerGuard, with_par: bool) -> Vec<Mock> {
        let url = server.url();
        let resource = server
            .mock("GET", "/.well-known/oauth-protected-resource")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"authorization_servers": [url]}).to_string())
            .create_async()
            .await;

        let mut meta = json!({
            "issuer": url,
            "authorization_endpoint": format!("{}/oauth/authorize", url),
            "token_endpoint": format!("{}/oauth/token", url),
        });
        if with_par {
            meta["pushed_authorization_request_endpoint"] = json!(format!("{}/oauth/par", url));
        }
        let server_meta = server
            .mock("GET", "/.well-known/oauth-authorization-server")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(meta.to_string())
            .create_async()
            .await;
        vec![resource, server_meta]
    }

    fn client_for(server: &ServerGuard) -> DiscoveryClient {
        let settings = ClientSettings {
            metadata: ClientMetadata::derive(
                "https://app.example.com",
                "https://app.example.com/oauth",
                "atproto",
                None,
            ),
            store: Arc::new(MemoryStore::new()),
            resolver: Arc::new(StaticResolver { pds: server.url() }),
        };
        DiscoveryClient::new(settings, Duration::from_secs(5)).expect("client should build")
    }

    #[test]
    fn pkce_challenge_matches_rfc7636_example() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[tokio::test]
    async fn authorize_uses_pushed_request_when_advertised() {
        let mut server = Server::new_async().await;
        let _discovery = discovery_mocks(&mut server, true).await;
        let par = server
            .mock("POST", "/oauth/par")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("login_hint".into(), "alice.test".into()),
                Matcher::UrlEncoded("code_challenge_method".into(), "S256".into()),
            ]))
            .with_status(201)
            .with_body(json!({"request_uri": "urn:ietf:params:oauth:request_uri:abc"}).to_string())
            .create_async()
            .await;

        let url = client_for(&server)
            .authorize("alice.test", "atproto")
            .await
            .expect("authorize should succeed");
        par.assert_async().await;

        assert!(url.as_str().starts_with(&format!("{}/oauth/authorize?", server.url())));
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(
            query.get("request_uri").map(String::as_str),
            Some("urn:ietf:params:oauth:request_uri:abc")
        );
        assert!(!query.contains_key("code_challenge"));
    }

    #[tokio::test]
    async fn unknown_handle_surfaces_as_resolver_error() {
        let server = Server::new_async().await;
        let err = client_for(&server)
            .authorize("ghost.test", "atproto")
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::Resolver(ResolveError::HandleNotFound(_))));
    }

    #[tokio::test]
    async fn callback_exchanges_code_for_the_authorized_did() {
        let mut server = Server::new_async().await;
        let _discovery = discovery_mocks(&mut server, false).await;
        let token = server
            .mock("POST", "/oauth/token")
            .match_body(Matcher::UrlEncoded("code".into(), "the-code".into()))
            .with_status(200)
            .with_body(json!({"sub": "did:plc:alice", "access_token": "at", "token_type": "DPoP"}).to_string())
            .create_async()
            .await;

        let client = client_for(&server);
        let url = client.authorize("alice.test", "atproto").await.unwrap();
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let state = query.get("state").cloned().expect("state in URL");

        let params = HashMap::from([
            ("code".to_string(), "the-code".to_string()),
            ("state".to_string(), state.clone()),
            ("iss".to_string(), server.url()),
        ]);
        let session = client.callback(&params).await.expect("callback should succeed");
        token.assert_async().await;
        assert_eq!(session.did, "did:plc:alice");

        // State is single-use.
        assert!(matches!(
            client.callback(&params).await,
            Err(OAuthError::Callback(_))
        ));
    }

    #[tokio::test]
    async fn callback_rejects_error_and_missing_params() {
        let server = Server::new_async().await;
        let client = client_for(&server);

        let denied = HashMap::from([("error".to_string(), "access_denied".to_string())]);
        assert!(matches!(client.callback(&denied).await, Err(OAuthError::Callback(_))));
        assert!(matches!(
            client.callback(&HashMap::new()).await,
            Err(OAuthError::Callback(_))
        ));
    }
}
