//! Tower plumbing around the gate.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::OriginalUri;
use axum::http::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use tower::{Layer, Service, ServiceExt};
use tracing::Instrument;

use super::{AtprotoAuth, GateOutcome, GateRequest};

/// Applies [`AuthGate`] to a host service.
#[derive(Clone)]
pub struct AuthGateLayer {
    auth: AtprotoAuth,
}

impl AuthGateLayer {
    pub fn new(auth: AtprotoAuth) -> Self {
        Self { auth }
    }
}

impl<S> Layer<S> for AuthGateLayer {
    type Service = AuthGate<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthGate::new(self.auth.clone(), inner)
    }
}

/// Gates every request. Requests for the middleware's endpoints are answered
/// here; everything else reaches the wrapped service once bootstrap is done.
#[derive(Clone)]
pub struct AuthGate<S> {
    auth: AtprotoAuth,
    inner: S,
}

impl<S> AuthGate<S> {
    pub fn new(auth: AtprotoAuth, inner: S) -> Self {
        Self { auth, inner }
    }
}

impl<S> Service<Request<Body>> for AuthGate<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        // Keep the service that was driven to readiness for this request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let auth = self.auth.clone();
        let span = auth.span().clone();

        Box::pin(
            async move {
                let outcome = {
                    let headers = req.headers();
                    let uri = req.uri();
                    let original_path = req
                        .extensions()
                        .get::<OriginalUri>()
                        .map_or(uri.path(), |OriginalUri(original)| original.path());
                    auth.gate(GateRequest {
                        headers,
                        uri,
                        original_path,
                    })
                    .await
                };

                match outcome {
                    GateOutcome::Respond(response) => Ok(response),
                    GateOutcome::Dispatch(router) => match router.oneshot(req).await {
                        Ok(response) => Ok(response),
                        Err(never) => match never {},
                    },
                    GateOutcome::PassThrough => inner.call(req).await,
                }
            }
            .instrument(span),
        )
    }
}
