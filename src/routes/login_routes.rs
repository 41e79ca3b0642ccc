//! Starts a login.

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{routing::get, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use crate::oauth::OAuthError;
use crate::state::AppState;
use crate::utils::{is_valid_handle, HTTPError, PrettyJson};

pub const PATH: &str = "/login";

#[derive(Deserialize)]
struct LoginParams {
    #[serde(default)]
    handle: String,
}

pub fn routes(prefix_route: &str) -> Router<AppState> {
    Router::new().route(&format!("{}{}", prefix_route, PATH), get(login))
}

/// Validates `handle` and redirects to the authorization server. Problems
/// are reported as `{handle, error}` with a 200, echoing the handle exactly
/// as it was sent. Surrounding whitespace is ignored for the login itself.
async fn login(
    State(state): State<AppState>,
    Query(params): Query<LoginParams>,
) -> Result<Response, HTTPError> {
    let sent = params.handle.as_str();
    let handle = sent.trim();
    if !is_valid_handle(handle) {
        return Ok(PrettyJson(json!({ "handle": sent, "error": "invalid handle" })).into_response());
    }

    let client = state.client()?;
    match client.authorize(handle, &state.runtime.scope).await {
        Ok(url) => {
            info!(handle, "Redirecting to authorization server");
            Ok(Redirect::to(url.as_str()).into_response())
        }
        Err(OAuthError::Resolver(e)) => {
            info!(handle, "Login failed: {}", e);
            Ok(PrettyJson(json!({ "handle": sent, "error": e.to_string() })).into_response())
        }
        Err(e) => {
            error!(handle, "Login failed: {}", e);
            Ok(PrettyJson(json!({ "handle": sent, "error": "Could not initiate login" }))
                .into_response())
        }
    }
}
