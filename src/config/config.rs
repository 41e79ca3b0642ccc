use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;
use super::store::StoreConfig;

/// Scope requested when the configuration does not name one.
pub const DEFAULT_SCOPE: &str = "atproto transition:generic";

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0: where to listen, how to log, and the gate itself.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ConfigV1 {
    pub bind_address: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub gate: GateConfig,
}

/// Everything the authentication middleware can be told up front.
/// Anything left out is defaulted or, for the public URL, detected later.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct GateConfig {
    #[serde(default)]
    pub store: StoreConfig,
    /// Static cookie-signing secret. Generated and persisted when absent.
    #[serde(default)]
    pub cookie_secret: Option<String>,
    /// Public base URL, e.g. `https://app.example.com`.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Sub-path the endpoints are served under. Defaults to `/oauth`.
    #[serde(default)]
    pub mount_path: Option<String>,
    /// Where to send the browser after a successful login.
    #[serde(default)]
    pub post_login_redirect: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub resolver: ResolverConfig,
}

impl GateConfig {
    pub fn scope(&self) -> &str {
        self.scope.as_deref().unwrap_or(DEFAULT_SCOPE)
    }
}

/// Settings for the DID/handle resolver.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ResolverConfig {
    #[serde(default = "default_plc_directory")]
    pub plc_directory: String,
    /// XRPC service used for handle lookups (`com.atproto.identity.resolveHandle`).
    /// Without it handles are resolved through their `/.well-known/atproto-did`.
    #[serde(default)]
    pub handle_resolver: Option<String>,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,
    #[serde(default = "default_timeout")]
    pub timeout_in_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            plc_directory: default_plc_directory(),
            handle_resolver: None,
            cache_ttl_seconds: default_cache_ttl(),
            timeout_in_ms: default_timeout(),
        }
    }
}

fn default_plc_directory() -> String {
    "https://plc.directory".to_string()
}

fn default_cache_ttl() -> u64 {
    600
}

fn default_timeout() -> u64 {
    5000
}

/// Load config from a YAML file (default `./config.yaml`, or `$ATGATE_CONFIG`),
/// with `ATGATE_`-prefixed environment variables layered on top.
pub fn load_config() -> Result<ConfigV1, Box<figment::Error>> {
    let path = std::env::var("ATGATE_CONFIG").unwrap_or_else(|_| "./config.yaml".to_string());
    let figment = Figment::new()
        .merge(Yaml::file(path))
        .merge(Env::prefixed("ATGATE_").split("__"));

    match figment.extract::<Config>().map_err(Box::new)? {
        Config::ConfigV1(c) => Ok(c),
    }
}

/// Print the JSON schema for the configuration to stdout.
pub fn print_schema() -> Result<(), serde_json::Error> {
    let schema = schema_for!(Config);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
