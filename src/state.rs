//! State shared by the middleware's route handlers.

use std::sync::Arc;

use axum::http::StatusCode;

use crate::gate::{AppContext, RuntimeConfig};
use crate::oauth::OAuthClient;
use crate::session::CookieSessions;
use crate::utils::HTTPError;

/// Captured once, when the routes are registered. Handlers read the runtime
/// config and context through the shared references, never through copies.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<AppContext>,
    pub runtime: Arc<RuntimeConfig>,
    pub sessions: CookieSessions,
}

impl AppState {
    /// The protocol client. The gate builds it before dispatching, so this
    /// only fails if a handler is reached some other way.
    pub fn client(&self) -> Result<&Arc<dyn OAuthClient>, HTTPError> {
        self.ctx.client().ok_or_else(|| {
            HTTPError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "authentication client not ready",
            )
        })
    }

    /// Absolute path of the endpoints as seen by the browser.
    pub fn prefix_path(&self) -> &str {
        self.runtime
            .paths()
            .map(|p| p.prefix_path.as_str())
            .unwrap_or_else(|| self.runtime.mount_path())
    }
}
