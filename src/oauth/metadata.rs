use serde::{Deserialize, Serialize};
use url::form_urlencoded;
use url::Url;

/// OAuth client metadata document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientMetadata {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    pub redirect_uris: Vec<String>,
    pub scope: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub application_type: String,
    pub token_endpoint_auth_method: String,
}

impl ClientMetadata {
    /// Derives the descriptor from the frozen base URL and base path.
    ///
    /// Loopback deployments get the `http://localhost?...` client id form,
    /// since authorization servers cannot fetch metadata from them.
    pub fn derive(base_url: &str, base_path: &str, scope: &str, client_name: Option<&str>) -> Self {
        let redirect_uri = format!("{}/callback", base_path);

        let (client_id, client_uri, application_type) = if is_loopback(base_url) {
            let query = form_urlencoded::Serializer::new(String::new())
                .append_pair("redirect_uri", &redirect_uri)
                .append_pair("scope", scope)
                .finish();
            (format!("http://localhost?{}", query), None, "native")
        } else {
            (
                format!("{}/client-metadata.json", base_path),
                Some(base_url.to_string()),
                "web",
            )
        };

        Self {
            client_id,
            client_name: client_name.map(str::to_string),
            client_uri,
            redirect_uris: vec![redirect_uri],
            scope: scope.to_string(),
            grant_types: vec!["authorization_code".to_string(), "refresh_token".to_string()],
            response_types: vec!["code".to_string()],
            application_type: application_type.to_string(),
            token_endpoint_auth_method: "none".to_string(),
        }
    }

    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uris.first().map(String::as_str)
    }
}

fn is_loopback(base_url: &str) -> bool {
    Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .is_some_and(|host| matches!(host.as_str(), "localhost" | "127.0.0.1" | "[::1]"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_deployment_uses_metadata_url_as_client_id() {
        let metadata = ClientMetadata::derive(
            "https://app.example.com",
            "https://app.example.com/oauth",
            "atproto",
            Some("Example"),
        );
        assert_eq!(
            metadata.client_id,
            "https://app.example.com/oauth/client-metadata.json"
        );
        assert_eq!(metadata.redirect_uri(), Some("https://app.example.com/oauth/callback"));
        assert_eq!(metadata.client_uri.as_deref(), Some("https://app.example.com"));
        assert_eq!(metadata.application_type, "web");
    }

    #[test]
    fn loopback_deployment_uses_localhost_client_id() {
        let metadata = ClientMetadata::derive(
            "http://127.0.0.1:4000",
            "http://127.0.0.1:4000/oauth",
            "atproto transition:generic",
            None,
        );
        assert_eq!(
            metadata.client_id,
            "http://localhost?redirect_uri=http%3A%2F%2F127.0.0.1%3A4000%2Foauth%2Fcallback\
             &scope=atproto+transition%3Ageneric"
        );
        assert_eq!(metadata.client_uri, None);
        assert_eq!(metadata.application_type, "native");
    }
}
