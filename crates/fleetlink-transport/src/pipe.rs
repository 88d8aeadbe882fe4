use std::path::{Path, PathBuf};

/// Generate a fresh, unused socket path for host/worker bootstrap.
pub fn generate_pipe_name() -> PathBuf {
    generate_pipe_name_in(&std::env::temp_dir())
}

/// Generate a fresh socket path inside `dir`.
pub fn generate_pipe_name_in(dir: &Path) -> PathBuf {
    dir.join(format!("fleetlink-{}.sock", uuid::Uuid::new_v4().simple()))
}
