//! Completes a login.

use std::collections::HashMap;

use axum::extract::{OriginalUri, State};
use axum::http::{header::SET_COOKIE, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{routing::get, Router};
use thiserror::Error;
use tracing::{error, info};
use url::form_urlencoded;

use crate::oauth::OAuthError;
use crate::session::SessionError;
use crate::state::AppState;
use crate::utils::HTTPError;

pub const PATH: &str = "/callback";

/// Where the browser goes when a callback fails. The reason is only logged.
const FAILURE_REDIRECT: &str = "/?error";

#[derive(Debug, Error)]
enum CallbackError {
    #[error("client unavailable")]
    Unavailable,
    #[error(transparent)]
    OAuth(#[from] OAuthError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<HTTPError> for CallbackError {
    fn from(_: HTTPError) -> Self {
        CallbackError::Unavailable
    }
}

pub fn routes(prefix_route: &str) -> Router<AppState> {
    Router::new().route(&format!("{}{}", prefix_route, PATH), get(callback))
}

async fn callback(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    match complete(&state, uri.query().unwrap_or(""), &headers).await {
        Ok(set_cookie) => {
            let location = state
                .runtime
                .post_login_redirect
                .clone()
                .unwrap_or_else(|| format!("{}/userinfo", state.prefix_path()));
            ([(SET_COOKIE, set_cookie)], Redirect::to(&location)).into_response()
        }
        Err(e) => {
            error!("OAuth callback failed: {}", e);
            Redirect::to(FAILURE_REDIRECT).into_response()
        }
    }
}

/// Exchanges the callback parameters and stores the DID in a freshly issued
/// session. Any session the browser already had is discarded.
async fn complete(
    state: &AppState,
    query: &str,
    headers: &HeaderMap,
) -> Result<HeaderValue, CallbackError> {
    let params: HashMap<String, String> = form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();

    let authorized = state.client()?.callback(&params).await?;
    let mut session = state.sessions.rotate_session(headers).await?;
    session.set_did(authorized.did.as_str());
    let set_cookie = session.save().await?;

    info!(did = authorized.did.as_str(), "Login completed");
    Ok(set_cookie)
}
