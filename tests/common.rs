#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use atgate::config::{GateConfig, ResolverConfig, StoreConfig};
use atgate::oauth::{
    CallbackSession, ClientMetadata, ClientSettings, OAuthClient, OAuthClientFactory, OAuthError,
};
use atgate::resolver::{BaseResolverFactory, IdentityResolver, ResolveError, ResolvedIdentity};
use atgate::startup::host_router;
use atgate::store::{MemoryStore, Store, StoreError, StoreOpener};
use atgate::AtprotoAuth;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tokio::sync::Notify;
use url::Url;

/// Opens a memory store once released.
#[derive(Default)]
pub struct GatedOpener {
    pub release: Notify,
}

#[async_trait]
impl StoreOpener for GatedOpener {
    async fn open(&self, _config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
        self.release.notified().await;
        Ok(Arc::new(MemoryStore::new()))
    }
}

pub struct FailingOpener;

#[async_trait]
impl StoreOpener for FailingOpener {
    async fn open(&self, _config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
        Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only filesystem",
        )))
    }
}

pub struct FakeResolver;

#[async_trait]
impl IdentityResolver for FakeResolver {
    async fn resolve_handle(&self, handle: &str) -> Result<String, ResolveError> {
        match handle {
            "alice.test" => Ok("did:plc:alice".to_string()),
            "offline.test" => Err(ResolveError::Http(
                "error sending request for url (http://10.0.0.5:2583/xrpc)".to_string(),
            )),
            other => Err(ResolveError::HandleNotFound(other.to_string())),
        }
    }

    async fn resolve_did(&self, did: &str) -> Result<ResolvedIdentity, ResolveError> {
        match did {
            "did:plc:alice" => Ok(ResolvedIdentity {
                did: did.to_string(),
                handle: Some("alice.test".to_string()),
                pds: Some("https://pds.example.com".to_string()),
            }),
            other => Err(ResolveError::DidNotFound(other.to_string())),
        }
    }
}

pub struct FakeResolverFactory;

impl BaseResolverFactory for FakeResolverFactory {
    fn create(&self, _config: &ResolverConfig) -> Result<Arc<dyn IdentityResolver>, ResolveError> {
        Ok(Arc::new(FakeResolver))
    }
}

#[derive(Default)]
pub struct Counters {
    pub builds: AtomicUsize,
    pub authorize_calls: AtomicUsize,
    pub callback_calls: AtomicUsize,
}

impl Counters {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }
}

/// Protocol client that never leaves the process. `code=good` completes as
/// `did:plc:alice`, `code=orphan` as a DID the resolver does not know;
/// anything else fails.
pub struct FakeClient {
    metadata: ClientMetadata,
    resolver: Arc<dyn IdentityResolver>,
    counters: Arc<Counters>,
}

#[async_trait]
impl OAuthClient for FakeClient {
    fn client_metadata(&self) -> &ClientMetadata {
        &self.metadata
    }

    async fn authorize(&self, handle: &str, scope: &str) -> Result<Url, OAuthError> {
        self.counters.authorize_calls.fetch_add(1, Ordering::SeqCst);
        if handle == "broken.test" {
            return Err(OAuthError::Http("connection reset by peer".to_string()));
        }
        let did = self.resolver.resolve_handle(handle).await?;
        Url::parse_with_params(
            "https://auth.example.com/authorize",
            &[("login_hint", handle), ("scope", scope), ("did", did.as_str())],
        )
        .map_err(|e| OAuthError::Http(e.to_string()))
    }

    async fn callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackSession, OAuthError> {
        self.counters.callback_calls.fetch_add(1, Ordering::SeqCst);
        match params.get("code").map(String::as_str) {
            Some("good") => Ok(CallbackSession {
                did: "did:plc:alice".to_string(),
            }),
            Some("orphan") => Ok(CallbackSession {
                did: "did:plc:orphan".to_string(),
            }),
            _ => Err(OAuthError::Callback("bad code".to_string())),
        }
    }
}

pub struct FakeClientFactory {
    pub counters: Arc<Counters>,
}

#[async_trait]
impl OAuthClientFactory for FakeClientFactory {
    async fn build(&self, settings: ClientSettings) -> Result<Arc<dyn OAuthClient>, OAuthError> {
        self.counters.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(FakeClient {
            metadata: settings.metadata,
            resolver: settings.resolver,
            counters: self.counters.clone(),
        }))
    }
}

pub fn gate_config() -> GateConfig {
    GateConfig {
        store: StoreConfig::Memory,
        cookie_secret: Some("integration-test-secret".to_string()),
        ..GateConfig::default()
    }
}

/// Builds a gate with in-process collaborators.
pub fn build_gate(config: GateConfig, opener: Arc<dyn StoreOpener>) -> (AtprotoAuth, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let auth = AtprotoAuth::builder(config)
        .store_opener(opener)
        .base_resolver(Arc::new(FakeResolverFactory))
        .client_factory(Arc::new(FakeClientFactory {
            counters: counters.clone(),
        }))
        .build()
        .expect("gate should build");
    (auth, counters)
}

/// Builds a gate whose bootstrap has already finished.
pub async fn ready_gate(config: GateConfig) -> (AtprotoAuth, Arc<Counters>) {
    let (auth, counters) = build_gate(config, Arc::new(atgate::store::DefaultStoreOpener));
    auth.ready().await.expect("bootstrap should succeed");
    (auth, counters)
}

/// The bundled host app with every request going through the gate.
pub fn gated_app(auth: &AtprotoAuth) -> Router {
    Router::new().fallback_service(auth.wrap(host_router()))
}

pub fn get(path: &str, host: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header(header::HOST, host)
        .body(Body::empty())
        .expect("failed to build request")
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    String::from_utf8(bytes.to_vec()).expect("body is not UTF-8")
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_text(response).await).expect("body is not JSON")
}

/// The `name=value` pair of the response's `Set-Cookie` header.
pub fn set_cookie_pair(response: &Response) -> String {
    response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .expect("response sets no cookie")
        .to_string()
}

pub fn with_cookie(mut request: Request<Body>, cookie: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert(header::COOKIE, cookie.parse().expect("invalid cookie"));
    request
}

pub fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("response has no Location header")
}
