use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The storage backends. We differentiate them via a "type" tag in the YAML.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// SQLite database file. Without a path the platform default is used.
    #[serde(rename = "sqlite")]
    Sqlite {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Process-local maps; nothing survives a restart.
    #[serde(rename = "memory")]
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Sqlite { path: None }
    }
}

/// `$XDG_DATA_HOME/atgate/atgate.db`, then `~/.local/share/atgate/atgate.db`,
/// then `./atgate.db`.
pub fn default_store_path() -> PathBuf {
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME")
                .filter(|v| !v.is_empty())
                .map(|home| PathBuf::from(home).join(".local").join("share"))
        });

    match data_home {
        Some(dir) => dir.join("atgate").join("atgate.db"),
        None => PathBuf::from("atgate.db"),
    }
}
