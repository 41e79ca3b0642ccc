//! Write-once runtime configuration.
//!
//! Fields that can only be known from the first request (public URL and the
//! derived paths) or from bootstrap (the persisted cookie secret) live in
//! `OnceLock`s: the first writer wins and the value never changes after.

use std::sync::OnceLock;

use http::{HeaderMap, Uri};
use tracing::info;

use crate::config::{detect_public_url, normalize_public_url, GateConfig, PublicUrl};

/// Paths derived from the public URL and the mount point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub base_url: String,
    /// Absolute path of the endpoints as seen by the browser, including any
    /// prefix the host stripped before the request reached the gate.
    pub prefix_path: String,
    /// Path of the endpoints as seen by the gate.
    pub prefix_route: String,
    /// `base_url + prefix_path`.
    pub base_path: String,
}

pub struct RuntimeConfig {
    mount_path: String,
    public_url: OnceLock<PublicUrl>,
    cookie_secret: OnceLock<String>,
    paths: OnceLock<ResolvedPaths>,
    pub post_login_redirect: Option<String>,
    pub scope: String,
    pub client_name: Option<String>,
}

impl RuntimeConfig {
    /// `mount_path` must already be normalized.
    pub fn new(config: &GateConfig, mount_path: String) -> Self {
        let public_url = OnceLock::new();
        match normalize_public_url(config.public_url.as_deref()) {
            PublicUrl::Unset => {}
            configured => {
                let _ = public_url.set(configured);
            }
        }

        let cookie_secret = OnceLock::new();
        if let Some(secret) = &config.cookie_secret {
            let _ = cookie_secret.set(secret.clone());
        }

        Self {
            mount_path,
            public_url,
            cookie_secret,
            paths: OnceLock::new(),
            post_login_redirect: config.post_login_redirect.clone(),
            scope: config.scope().to_string(),
            client_name: config.client_name.clone(),
        }
    }

    pub fn mount_path(&self) -> &str {
        &self.mount_path
    }

    pub fn public_url(&self) -> Option<&PublicUrl> {
        self.public_url.get()
    }

    /// Returns the frozen public URL, detecting it from this request if no
    /// earlier request or static configuration has set it.
    pub fn resolve_public_url(&self, headers: &HeaderMap, uri: &Uri) -> &PublicUrl {
        self.public_url.get_or_init(|| {
            let detected = detect_public_url(headers, uri);
            info!(
                event_name = "gate.public_url.detected",
                event_domain = "gate",
                public_url = detected.as_str(),
                "public URL detected from first request"
            );
            PublicUrl::Valid(detected)
        })
    }

    pub fn cookie_secret(&self) -> Option<&str> {
        self.cookie_secret.get().map(String::as_str)
    }

    /// Returns false if a secret was already set; the existing one is kept.
    pub fn set_cookie_secret(&self, secret: String) -> bool {
        self.cookie_secret.set(secret).is_ok()
    }

    pub fn paths(&self) -> Option<&ResolvedPaths> {
        self.paths.get()
    }

    /// Freezes the paths on first call. `upstream_prefix` is the part of the
    /// path the host stripped before handing the request to the gate.
    pub fn resolve_paths(&self, base_url: &str, upstream_prefix: &str) -> &ResolvedPaths {
        self.paths.get_or_init(|| {
            let prefix_path = format!("{}{}", upstream_prefix, self.mount_path);
            let paths = ResolvedPaths {
                base_url: base_url.to_string(),
                base_path: format!("{}{}", base_url, prefix_path),
                prefix_route: self.mount_path.clone(),
                prefix_path,
            };
            info!(
                event_name = "gate.paths.resolved",
                event_domain = "gate",
                base_path = paths.base_path.as_str(),
                prefix_route = paths.prefix_route.as_str(),
                "runtime paths frozen"
            );
            paths
        })
    }
}

/// The prefix a host router stripped: `original` minus its `current` suffix.
pub fn upstream_prefix(original: &str, current: &str) -> String {
    if original == current {
        return String::new();
    }
    if current == "/" {
        return original.trim_end_matches('/').to_string();
    }
    original
        .strip_suffix(current)
        .unwrap_or("")
        .trim_end_matches('/')
        .to_string()
}
