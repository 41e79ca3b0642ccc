//! Reports who is logged in.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::{routing::get, Router};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::session::SessionError;
use crate::state::AppState;
use crate::utils::PrettyJson;

pub const PATH: &str = "/userinfo";

pub fn routes(prefix_route: &str) -> Router<AppState> {
    Router::new().route(&format!("{}{}", prefix_route, PATH), get(userinfo))
}

/// `{user: null, info}` when nobody is logged in, `{user: null, error}` when
/// the lookup failed, `{user}` otherwise.
async fn userinfo(State(state): State<AppState>, headers: HeaderMap) -> PrettyJson<Value> {
    let session = match state.sessions.get_session(&headers).await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to load session: {}", e);
            return PrettyJson(json!({ "user": null, "error": "Could not load session" }));
        }
    };

    match state
        .sessions
        .get_session_user(&session, state.ctx.resolver.as_ref())
        .await
    {
        Ok(None) => PrettyJson(json!({ "user": null, "info": "not logged-in" })),
        Ok(Some(user)) => PrettyJson(json!({ "user": user })),
        Err(SessionError::Resolve(e)) => {
            warn!("Failed to resolve session user: {}", e);
            PrettyJson(json!({ "user": null, "error": e.to_string() }))
        }
        Err(e) => {
            error!("Failed to resolve session user: {}", e);
            PrettyJson(json!({ "user": null, "error": "Could not load user" }))
        }
    }
}
