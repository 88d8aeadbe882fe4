//! Extension runtime inside the worker process.
//!
//! An extension is a JSON manifest naming operations, each backed by an
//! external command:
//!
//! ```json
//! {
//!   "name": "release-tools",
//!   "operations": [
//!     {"name": "tag", "args": ["version"], "command": ["./tag.sh", "--sign"]}
//!   ]
//! }
//! ```
//!
//! Executing an operation runs its command with the call arguments appended,
//! from the manifest's directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use fleetlink_frame::Fault;
use fleetlink_host::{HostProxy, OperationDescription, WorkerOperations};
use fleetlink_rpc::RpcError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

const MANIFEST_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "required": ["name", "operations"],
  "properties": {
    "name": {"type": "string", "minLength": 1},
    "operations": {
      "type": "array",
      "items": {
        "type": "object",
        "required": ["name", "command"],
        "properties": {
          "name": {"type": "string", "minLength": 1},
          "description": {"type": "string"},
          "args": {"type": "array", "items": {"type": "string"}},
          "command": {
            "type": "array",
            "minItems": 1,
            "items": {"type": "string"}
          }
        },
        "additionalProperties": false
      }
    }
  }
}"#;

/// Errors loading an extension manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("manifest {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("manifest {path} is invalid: {message}")]
    Invalid { path: PathBuf, message: String },

    #[error("failed to compile manifest schema: {0}")]
    Schema(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub operations: Vec<ManifestOperation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestOperation {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    pub command: Vec<String>,
}

impl ManifestOperation {
    pub fn describe(&self) -> OperationDescription {
        OperationDescription {
            name: self.name.clone(),
            args: self.args.clone(),
            description: self.description.clone(),
        }
    }
}

/// Read and validate a manifest.
pub fn load_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&text).map_err(|source| ManifestError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let schema: Value = serde_json::from_str(MANIFEST_SCHEMA)
        .map_err(|err| ManifestError::Schema(err.to_string()))?;
    let validator =
        jsonschema::validator_for(&schema).map_err(|err| ManifestError::Schema(err.to_string()))?;
    let messages: Vec<String> = validator
        .iter_errors(&value)
        .take(4)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(ManifestError::Invalid {
            path: path.to_path_buf(),
            message: messages.join("; "),
        });
    }

    serde_json::from_value(value).map_err(|source| ManifestError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Result of running an operation's command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutput {
    /// Exit code, absent if the command was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl OperationOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

#[derive(Debug, Clone)]
struct LoadedOperation {
    program: PathBuf,
    base_args: Vec<String>,
    dir: PathBuf,
}

impl LoadedOperation {
    fn new(op: &ManifestOperation, dir: &Path) -> Self {
        let (program, base_args) = match op.command.split_first() {
            Some((program, rest)) => (program.as_str(), rest.to_vec()),
            None => ("", Vec::new()),
        };
        // Relative paths with a directory part are relative to the manifest.
        let program = if program.contains('/') && Path::new(program).is_relative() {
            dir.join(program)
        } else {
            PathBuf::from(program)
        };
        Self {
            program,
            base_args,
            dir: dir.to_path_buf(),
        }
    }

    async fn run(&self, args: &[String]) -> std::io::Result<OperationOutput> {
        let output = Command::new(&self.program)
            .args(&self.base_args)
            .args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(OperationOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn rpc_fault(err: RpcError) -> Fault {
    match err {
        RpcError::Fault(fault) => fault,
        other => Fault::from_error(&other),
    }
}

/// Worker service backed by extension manifests.
pub struct ExtensionWorker {
    host: HostProxy,
    operations: Mutex<HashMap<String, LoadedOperation>>,
}

impl ExtensionWorker {
    pub fn new(host: HostProxy) -> Self {
        Self {
            host,
            operations: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl WorkerOperations for ExtensionWorker {
    async fn load_file(&self, path: String) -> Result<(), Fault> {
        self.host.log_debug(&format!("loading extension from {path}"));
        let manifest_path = PathBuf::from(&path);
        let manifest = load_manifest(&manifest_path).map_err(|err| {
            self.host.log_error(&err.to_string());
            Fault::from_error(&err)
        })?;
        let dir = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        for op in &manifest.operations {
            self.operations
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(op.name.clone(), LoadedOperation::new(op, &dir));
            self.host
                .register_operation(&op.describe())
                .await
                .map_err(rpc_fault)?;
        }

        info!(extension = %manifest.name, operations = manifest.operations.len(), "extension loaded");
        self.host.log_info(&format!(
            "extension {} loaded with {} operation(s)",
            manifest.name,
            manifest.operations.len()
        ));
        Ok(())
    }

    async fn execute_registered_operation(
        &self,
        name: String,
        args: Vec<String>,
    ) -> Result<Value, Fault> {
        let operation = self
            .operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&name)
            .cloned()
            .ok_or_else(|| Fault::message(format!("unknown operation {name}")))?;

        debug!(operation = %name, program = %operation.program.display(), ?args, "executing operation");
        let output = operation.run(&args).await.map_err(|err| {
            Fault::message(format!(
                "failed to run {}: {err}",
                operation.program.display()
            ))
        })?;
        debug!(operation = %name, status = ?output.status, "operation finished");
        Ok(serde_json::to_value(output)?)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_manifest(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("extension.json");
        fs::write(&path, body).expect("manifest should be written");
        path
    }

    #[test]
    fn valid_manifest_loads() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = write_manifest(
            dir.path(),
            r#"{"name": "tools", "operations": [
                {"name": "greet", "args": ["who"], "command": ["echo", "hello"]}
            ]}"#,
        );

        let manifest = load_manifest(&path).expect("manifest should load");
        assert_eq!(manifest.name, "tools");
        assert_eq!(
            manifest.operations[0].describe(),
            OperationDescription {
                name: "greet".to_string(),
                args: vec!["who".to_string()],
                description: None,
            }
        );
    }

    #[test]
    fn schema_violations_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = write_manifest(
            dir.path(),
            r#"{"name": "tools", "operations": [{"name": "greet", "command": []}]}"#,
        );
        assert!(matches!(load_manifest(&path), Err(ManifestError::Invalid { .. })));

        let path = write_manifest(dir.path(), r#"{"operations": []}"#);
        assert!(matches!(load_manifest(&path), Err(ManifestError::Invalid { .. })));

        let path = write_manifest(dir.path(), "not json");
        assert!(matches!(load_manifest(&path), Err(ManifestError::Json { .. })));

        let missing = dir.path().join("missing.json");
        assert!(matches!(load_manifest(&missing), Err(ManifestError::Read { .. })));
    }

    #[test]
    fn every_violation_is_listed() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = write_manifest(dir.path(), r#"{"name": 5, "operations": "none"}"#);
        let Err(ManifestError::Invalid { message, .. }) = load_manifest(&path) else {
            panic!("expected an invalid manifest");
        };
        assert_eq!(message.split("; ").count(), 2, "{message}");
    }

    #[test]
    fn relative_programs_resolve_against_the_manifest() {
        let op = ManifestOperation {
            name: "tag".to_string(),
            description: None,
            args: Vec::new(),
            command: vec!["./tag.sh".to_string(), "--sign".to_string()],
        };
        let loaded = LoadedOperation::new(&op, Path::new("/opt/ext"));
        assert_eq!(loaded.program, Path::new("/opt/ext/./tag.sh"));
        assert_eq!(loaded.base_args, ["--sign"]);

        let op = ManifestOperation {
            command: vec!["echo".to_string()],
            ..op
        };
        assert_eq!(LoadedOperation::new(&op, Path::new("/opt/ext")).program, Path::new("echo"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn commands_receive_base_and_call_args() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let op = ManifestOperation {
            name: "greet".to_string(),
            description: None,
            args: vec!["who".to_string()],
            command: vec!["echo".to_string(), "hello".to_string()],
        };
        let output = LoadedOperation::new(&op, dir.path())
            .run(&["world".to_string()])
            .await
            .expect("echo should run");
        assert!(output.success());
        assert_eq!(output.stdout, "hello world\n");
    }
}
