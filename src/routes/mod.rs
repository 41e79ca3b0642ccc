//! The middleware's own endpoints.
//!
//! They are bound once, under the prefix route frozen by the first request
//! that gets through the gate. The gate dispatches requests whose path is one
//! of the bound paths to this router and lets everything else through to the
//! host.

mod callback_routes;
mod health_routes;
mod login_routes;
mod metadata_routes;
mod userinfo_routes;

pub use health_routes::routes as health_routes;

use axum::Router;
use tracing::info;

use crate::state::AppState;

/// The bound endpoints.
pub struct RegisteredRoutes {
    router: Router,
    paths: Vec<String>,
}

impl RegisteredRoutes {
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn matches(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }
}

/// Binds the metadata, callback, login and userinfo endpoints under
/// `prefix_route`.
pub fn register(state: AppState, prefix_route: &str) -> RegisteredRoutes {
    let endpoints = [
        metadata_routes::PATH,
        callback_routes::PATH,
        login_routes::PATH,
        userinfo_routes::PATH,
    ];
    let paths: Vec<String> = endpoints
        .iter()
        .map(|endpoint| format!("{}{}", prefix_route, endpoint))
        .collect();

    let router = Router::new()
        .merge(metadata_routes::routes(prefix_route))
        .merge(callback_routes::routes(prefix_route))
        .merge(login_routes::routes(prefix_route))
        .merge(userinfo_routes::routes(prefix_route))
        .with_state(state);

    info!(
        event_name = "gate.routes.registered",
        event_domain = "gate",
        prefix_route,
        "registered {} endpoints",
        paths.len()
    );
    RegisteredRoutes { router, paths }
}
