use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::store::{load_json_or_default, StoreError};

/// A peer instance that data can be pushed to or pulled from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    /// Host name or address of the peer. A `host:port` form overrides the
    /// default exchange port.
    pub url: String,
}

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_path: Option<PathBuf>,
    #[serde(default)]
    pub remotes: Vec<Remote>,
}

impl Config {
    /// Load from `path`. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        load_json_or_default(path)
    }

    pub fn remote(&self, name: &str) -> Option<&Remote> {
        self.remotes.iter().find(|remote| remote.name == name)
    }
}
