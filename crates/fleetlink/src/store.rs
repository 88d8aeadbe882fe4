//! The local dataset shared between peers: repositories and projects.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fleetlink_host::Repository;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Errors reading or writing local JSON state.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to encode state: {0}")]
    Encode(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    JavaScript,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub repository: Repository,
    pub path: String,
    pub language: Language,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Data {
    #[serde(default)]
    pub repos: Vec<Repository>,
    #[serde(default)]
    pub projects: Vec<Project>,
}

impl Data {
    /// Load from `path`. A missing file is an empty dataset.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        load_json_or_default(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        save_json(path, self)
    }

    /// The repository of the project called `name`.
    pub fn repository_for_project(&self, name: &str) -> Option<&Repository> {
        self.projects
            .iter()
            .find(|project| project.name == name)
            .map(|project| &project.repository)
    }
}

/// Fold `incoming` into `local`.
///
/// Repositories are matched by url and projects by name; an incoming entry
/// replaces a local one with the same key, new entries are appended.
pub fn merge_data(local: &mut Data, incoming: Data) {
    for repo in incoming.repos {
        match local.repos.iter_mut().find(|r| r.url == repo.url) {
            Some(existing) => *existing = repo,
            None => local.repos.push(repo),
        }
    }
    for project in incoming.projects {
        match local.projects.iter_mut().find(|p| p.name == project.name) {
            Some(existing) => *existing = project,
            None => local.projects.push(project),
        }
    }
}

pub(crate) fn load_json_or_default<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&text).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut text = serde_json::to_string_pretty(value).map_err(StoreError::Encode)?;
    text.push('\n');

    // Readers only ever see a complete file.
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, text)
        .and_then(|()| fs::rename(&tmp, path))
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
}
