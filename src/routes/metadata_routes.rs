//! Client metadata document.

use axum::extract::State;
use axum::{routing::get, Router};

use crate::oauth::ClientMetadata;
use crate::state::AppState;
use crate::utils::{HTTPError, PrettyJson};

pub const PATH: &str = "/client-metadata.json";

pub fn routes(prefix_route: &str) -> Router<AppState> {
    Router::new().route(&format!("{}{}", prefix_route, PATH), get(client_metadata))
}

async fn client_metadata(
    State(state): State<AppState>,
) -> Result<PrettyJson<ClientMetadata>, HTTPError> {
    Ok(PrettyJson(state.client()?.client_metadata().clone()))
}
