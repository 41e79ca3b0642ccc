//! Mount path and public URL normalization.
//!
//! Mount paths are validated once, when the middleware is built, and a bad one
//! aborts construction. Public URLs may arrive late (static config or the first
//! request's transport context) so a bad one is reported as
//! [`PublicUrl::Invalid`] and turned into a 503 by the gate instead.

use http::HeaderMap;
use thiserror::Error;
use url::Url;

/// Mount path used when the configuration does not name one.
pub const DEFAULT_MOUNT_PATH: &str = "/oauth";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid mount path '{0}': {1}")]
    InvalidMountPath(String, &'static str),
}

/// The public base URL of the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicUrl {
    /// Not configured; detect it from the first request.
    Unset,
    Valid(String),
    /// Configured but malformed.
    Invalid,
}

impl PublicUrl {
    pub fn as_valid(&self) -> Option<&str> {
        match self {
            PublicUrl::Valid(url) => Some(url),
            _ => None,
        }
    }
}

/// Canonicalizes a mount path to `/segment[/segment...]`.
pub fn normalize_mount_path(input: Option<&str>) -> Result<String, ConfigError> {
    let raw = match input {
        None => return Ok(DEFAULT_MOUNT_PATH.to_string()),
        Some(raw) => raw.trim(),
    };
    let invalid = |reason| ConfigError::InvalidMountPath(raw.to_string(), reason);

    if raw.chars().any(char::is_whitespace) {
        return Err(invalid("must not contain whitespace"));
    }
    if raw.contains('?') || raw.contains('#') {
        return Err(invalid("must not contain a query or fragment"));
    }

    let trimmed = raw.trim_end_matches('/');
    let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
    if body.is_empty() {
        return Err(invalid("must name a sub-path"));
    }

    for segment in body.split('/') {
        match segment {
            "" => return Err(invalid("must not contain empty segments")),
            "." | ".." => return Err(invalid("must not contain relative segments")),
            _ => {}
        }
    }

    Ok(format!("/{}", body))
}

/// Validates a public URL. Absent input defers to auto-detection.
pub fn normalize_public_url(input: Option<&str>) -> PublicUrl {
    let raw = match input.map(str::trim) {
        None => return PublicUrl::Unset,
        Some(raw) => raw,
    };

    match Url::parse(raw) {
        Ok(url)
            if matches!(url.scheme(), "http" | "https")
                && url.host_str().is_some_and(|h| !h.is_empty()) =>
        {
            PublicUrl::Valid(raw.trim_end_matches('/').to_string())
        }
        _ => PublicUrl::Invalid,
    }
}

/// Builds the public URL from a request's transport context.
///
/// Never yields [`PublicUrl::Invalid`]: anything that does not validate falls
/// back to a loopback URL on the port named by the host.
pub fn detect_public_url(headers: &HeaderMap, uri: &http::Uri) -> String {
    let protocol = first_header_value(headers, "x-forwarded-proto")
        .or_else(|| uri.scheme_str().map(str::to_string))
        .unwrap_or_else(|| "http".to_string());
    let host = first_header_value(headers, "x-forwarded-host")
        .or_else(|| first_header_value(headers, http::header::HOST.as_str()))
        .or_else(|| uri.authority().map(|a| a.to_string()))
        .unwrap_or_default();

    if let PublicUrl::Valid(url) = normalize_public_url(Some(&format!("{}://{}", protocol, host))) {
        return url;
    }

    match host_port(&host) {
        Some(port) => format!("http://127.0.0.1:{}", port),
        None => "http://127.0.0.1".to_string(),
    }
}

fn first_header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn host_port(host: &str) -> Option<&str> {
    let (_, port) = host.rsplit_once(':')?;
    (!port.is_empty() && port.chars().all(|c| c.is_ascii_digit())).then_some(port)
}
