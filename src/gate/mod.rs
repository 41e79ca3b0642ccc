//! The authentication gate: lazy bootstrap, request gating and one-time
//! route registration.

pub mod bootstrap;
pub mod context;
pub mod runtime;
pub mod service;

pub use bootstrap::{BootstrapError, BootstrapState};
pub use context::AppContext;
pub use runtime::{upstream_prefix, ResolvedPaths, RuntimeConfig};
pub use service::{AuthGate, AuthGateLayer};

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument, Span};

use self::bootstrap::{bootstrap, BootstrapDeps};
use crate::config::{normalize_mount_path, ConfigError, GateConfig, PublicUrl};
use crate::oauth::{ClientMetadata, ClientSettings, DiscoveryClientFactory, OAuthClientFactory};
use crate::resolver::{BaseResolverFactory, HttpResolverFactory};
use crate::routes::{self, RegisteredRoutes};
use crate::session::CookieSessions;
use crate::state::AppState;
use crate::store::{DefaultStoreOpener, StoreOpener};
use crate::utils::log_throttle::LogThrottle;
use crate::utils::HTTPError;

const INITIALIZING_LOG_WINDOW: Duration = Duration::from_secs(5);
const FAILED_LOG_WINDOW: Duration = Duration::from_secs(60);

/// An embeddable atproto OAuth middleware instance.
///
/// Building one starts bootstrap in the background. Requests that reach the
/// gate before bootstrap finishes get a 503; once it is ready the first
/// request freezes the public URL and paths and registers the endpoints.
#[derive(Clone)]
pub struct AtprotoAuth {
    inner: Arc<GateInner>,
}

pub(crate) struct GateInner {
    runtime: Arc<RuntimeConfig>,
    state: watch::Receiver<BootstrapState>,
    aborted: OnceLock<Arc<BootstrapError>>,
    routes: OnceLock<RegisteredRoutes>,
    client_factory: Arc<dyn OAuthClientFactory>,
    task: Mutex<Option<JoinHandle<()>>>,
    throttle: LogThrottle,
    span: Span,
}

/// The parts of a request the gate looks at.
pub(crate) struct GateRequest<'a> {
    pub headers: &'a HeaderMap,
    pub uri: &'a Uri,
    /// Path before any host router stripped a prefix.
    pub original_path: &'a str,
}

/// What the gate decided for one request.
pub(crate) enum GateOutcome {
    Respond(Response),
    Dispatch(Router),
    PassThrough,
}

pub struct AtprotoAuthBuilder {
    config: GateConfig,
    store_opener: Arc<dyn StoreOpener>,
    resolver_factory: Arc<dyn BaseResolverFactory>,
    client_factory: Arc<dyn OAuthClientFactory>,
    span: Option<Span>,
}

impl AtprotoAuthBuilder {
    pub fn store_opener(mut self, opener: Arc<dyn StoreOpener>) -> Self {
        self.store_opener = opener;
        self
    }

    pub fn base_resolver(mut self, factory: Arc<dyn BaseResolverFactory>) -> Self {
        self.resolver_factory = factory;
        self
    }

    pub fn client_factory(mut self, factory: Arc<dyn OAuthClientFactory>) -> Self {
        self.client_factory = factory;
        self
    }

    /// Span every gated request and the bootstrap task run in.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validates the mount path and starts bootstrap. Must be called inside
    /// a tokio runtime.
    pub fn build(self) -> Result<AtprotoAuth, ConfigError> {
        let mount_path = normalize_mount_path(self.config.mount_path.as_deref())?;
        let runtime = Arc::new(RuntimeConfig::new(&self.config, mount_path));
        if let Some(PublicUrl::Invalid) = runtime.public_url() {
            warn!(
                "Configured public_url '{}' is not a valid http(s) URL; requests will be refused",
                self.config.public_url.as_deref().unwrap_or_default()
            );
        }

        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("atgate"));
        let (tx, rx) = watch::channel(BootstrapState::Pending);
        let deps = BootstrapDeps {
            store_opener: self.store_opener,
            resolver_factory: self.resolver_factory,
            store_config: self.config.store.clone(),
            resolver_config: self.config.resolver.clone(),
        };

        let task_runtime = runtime.clone();
        let task = tokio::spawn(
            async move {
                let state = match bootstrap(deps, &task_runtime).await {
                    Ok(ctx) => {
                        info!(
                            event_name = "gate.bootstrap.ready",
                            event_domain = "gate",
                            "authentication middleware ready"
                        );
                        BootstrapState::Ready(Arc::new(ctx))
                    }
                    Err(e) => {
                        error!(
                            event_name = "gate.bootstrap.failed",
                            event_domain = "gate",
                            "authentication middleware failed to initialize: {}",
                            e
                        );
                        BootstrapState::Failed(Arc::new(e))
                    }
                };
                tx.send_replace(state);
            }
            .instrument(span.clone()),
        );

        Ok(AtprotoAuth {
            inner: Arc::new(GateInner {
                runtime,
                state: rx,
                aborted: OnceLock::new(),
                routes: OnceLock::new(),
                client_factory: self.client_factory,
                task: Mutex::new(Some(task)),
                throttle: LogThrottle::new(),
                span,
            }),
        })
    }
}

impl AtprotoAuth {
    /// Starts configuring an instance with the default store, resolver and
    /// protocol client.
    pub fn builder(config: GateConfig) -> AtprotoAuthBuilder {
        AtprotoAuthBuilder {
            config,
            store_opener: Arc::new(DefaultStoreOpener),
            resolver_factory: Arc::new(HttpResolverFactory),
            client_factory: Arc::new(DiscoveryClientFactory::default()),
            span: None,
        }
    }

    /// Shorthand for `builder(config).build()`.
    pub fn new(config: GateConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    pub fn layer(&self) -> AuthGateLayer {
        AuthGateLayer::new(self.clone())
    }

    /// Gates `service`, same as applying [`Self::layer`].
    pub fn wrap<S>(&self, service: S) -> AuthGate<S> {
        AuthGate::new(self.clone(), service)
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.inner.runtime
    }

    /// The current bootstrap state. Never waits.
    pub fn state(&self) -> BootstrapState {
        self.inner.current_state()
    }

    /// Paths bound by route registration, once it has happened.
    pub fn registered_paths(&self) -> Option<&[String]> {
        self.inner.routes.get().map(RegisteredRoutes::paths)
    }

    /// Registers the endpoints under the frozen prefix route. Returns false
    /// if they were already registered, or if bootstrap or path resolution
    /// has not happened yet.
    pub fn register_routes(&self) -> bool {
        match self.inner.current_state() {
            BootstrapState::Ready(ctx) => self.inner.register_routes(&ctx).1,
            _ => false,
        }
    }

    /// Waits until bootstrap reaches a terminal state.
    pub async fn ready(&self) -> Result<(), Arc<BootstrapError>> {
        let mut rx = self.inner.state.clone();
        loop {
            match self.inner.current_state() {
                BootstrapState::Ready(_) => return Ok(()),
                BootstrapState::Failed(e) => return Err(e),
                BootstrapState::Pending => {
                    // A closed channel resolves to Ready/Failed on the next pass.
                    let _ = rx.changed().await;
                }
            }
        }
    }

    /// Stops a still-running bootstrap and closes the store.
    pub async fn shutdown(&self) {
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        if let BootstrapState::Ready(ctx) = self.inner.current_state() {
            ctx.store.close().await;
        }
        info!(
            event_name = "gate.shutdown",
            event_domain = "gate",
            "authentication middleware shut down"
        );
    }

    pub(crate) fn span(&self) -> &Span {
        &self.inner.span
    }

    pub(crate) async fn gate(&self, req: GateRequest<'_>) -> GateOutcome {
        self.inner.gate(req).await
    }
}

impl GateInner {
    fn current_state(&self) -> BootstrapState {
        let state = self.state.borrow().clone();
        if !state.is_pending() || self.state.has_changed().is_ok() {
            return state;
        }
        // The sender is gone: either bootstrap just published its result or
        // the task died without publishing.
        match &*self.state.borrow() {
            BootstrapState::Pending => BootstrapState::Failed(
                self.aborted
                    .get_or_init(|| Arc::new(BootstrapError::Aborted))
                    .clone(),
            ),
            published => published.clone(),
        }
    }

    /// Returns the registered routes and whether this call registered them.
    /// Registration needs the frozen paths.
    fn register_routes(&self, ctx: &Arc<AppContext>) -> (Option<&RegisteredRoutes>, bool) {
        if let Some(routes) = self.routes.get() {
            return (Some(routes), false);
        }
        let (Some(paths), Some(secret)) = (self.runtime.paths(), self.runtime.cookie_secret())
        else {
            return (None, false);
        };

        let mut registered_now = false;
        let routes = self.routes.get_or_init(|| {
            registered_now = true;
            let state = AppState {
                ctx: ctx.clone(),
                runtime: self.runtime.clone(),
                sessions: CookieSessions::new(
                    ctx.store.clone(),
                    secret,
                    paths.base_url.starts_with("https://"),
                ),
            };
            routes::register(state, &paths.prefix_route)
        });
        (Some(routes), registered_now)
    }

    async fn gate(&self, req: GateRequest<'_>) -> GateOutcome {
        let ctx = match self.current_state() {
            BootstrapState::Ready(ctx) => ctx,
            BootstrapState::Failed(e) => {
                if let Some(suppressed_count) = self
                    .throttle
                    .should_emit("gate.bootstrap.failed", FAILED_LOG_WINDOW)
                {
                    error!(
                        event_name = "gate.request.rejected",
                        event_domain = "gate",
                        suppressed_count,
                        "rejecting request, bootstrap failed: {}",
                        e
                    );
                }
                let mut response = HTTPError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "authentication middleware failed to initialize",
                )
                .into_response();
                response.extensions_mut().insert(e);
                return GateOutcome::Respond(response);
            }
            BootstrapState::Pending => {
                if let Some(suppressed_count) = self
                    .throttle
                    .should_emit("gate.bootstrap.pending", INITIALIZING_LOG_WINDOW)
                {
                    info!(
                        event_name = "gate.request.deferred",
                        event_domain = "gate",
                        suppressed_count,
                        "authentication middleware still initializing"
                    );
                }
                return GateOutcome::Respond(
                    (StatusCode::SERVICE_UNAVAILABLE, "initializing").into_response(),
                );
            }
        };

        let base_url = match self.runtime.resolve_public_url(req.headers, req.uri) {
            PublicUrl::Valid(url) => url.clone(),
            _ => {
                return GateOutcome::Respond(
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "authentication middleware misconfigured: public_url must be an absolute http(s) URL",
                    )
                        .into_response(),
                );
            }
        };

        let current_path = req.uri.path();
        let paths = self
            .runtime
            .resolve_paths(&base_url, &upstream_prefix(req.original_path, current_path));

        let routes = match self.register_routes(&ctx).0 {
            Some(routes) => routes,
            None => {
                error!("Cookie secret missing after bootstrap");
                return GateOutcome::Respond(
                    HTTPError::new(StatusCode::INTERNAL_SERVER_ERROR, "authentication unavailable")
                        .into_response(),
                );
            }
        };

        let client = ctx
            .get_or_build_client(self.client_factory.as_ref(), || ClientSettings {
                metadata: ClientMetadata::derive(
                    &paths.base_url,
                    &paths.base_path,
                    &self.runtime.scope,
                    self.runtime.client_name.as_deref(),
                ),
                store: ctx.store.clone(),
                resolver: ctx.resolver.clone(),
            })
            .await;
        if let Err(e) = client {
            error!(
                event_name = "gate.client.failed",
                event_domain = "gate",
                "failed to create OAuth client: {}",
                e
            );
            return GateOutcome::Respond(
                HTTPError::new(StatusCode::INTERNAL_SERVER_ERROR, "authentication unavailable")
                    .into_response(),
            );
        }

        if routes.matches(current_path) {
            GateOutcome::Dispatch(routes.router())
        } else {
            GateOutcome::PassThrough
        }
    }
}
