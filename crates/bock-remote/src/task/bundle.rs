//! Runtime bundle directories for task containers.

use std::path::{Path, PathBuf};

use bock_common::BockResult;
use bock_oci::Spec;
use bock_oci::runtime::{IdMapping, Linux};

/// File name of the spec inside a bundle.
pub const CONFIG_FILE: &str = "config.json";

/// Host uid and gid that root inside the container maps to.
///
/// Without a user namespace both are 0.
#[must_use]
pub fn root_ids(linux: Option<&Linux>) -> (u32, u32) {
    match linux {
        Some(linux) if linux.has_user_namespace() => (
            host_id_from_map(0, &linux.uid_mappings),
            host_id_from_map(0, &linux.gid_mappings),
        ),
        _ => (0, 0),
    }
}

fn host_id_from_map(id: u32, mappings: &[IdMapping]) -> u32 {
    mappings
        .iter()
        .find_map(|m| m.host_id_for(id))
        .unwrap_or(0)
}

/// Write `spec` as the bundle for container `id` under `state_dir`.
///
/// The bundle directory is handed to the container's root user when a user
/// namespace remaps it.
///
/// # Errors
///
/// Fails if the directory or config file cannot be written or chowned.
pub fn prepare(state_dir: &Path, id: &str, spec: &Spec) -> BockResult<PathBuf> {
    let dir = state_dir.join(id);
    std::fs::create_dir_all(&dir)?;
    if let Err(err) = write_config(&dir, spec) {
        remove(&dir);
        return Err(err);
    }

    tracing::debug!(container_id = %id, bundle = %dir.display(), "Prepared bundle");
    Ok(dir)
}

fn write_config(dir: &Path, spec: &Spec) -> BockResult<()> {
    std::fs::write(dir.join(CONFIG_FILE), serde_json::to_vec_pretty(spec)?)?;

    let (uid, gid) = root_ids(spec.linux.as_ref());
    if uid != 0 || gid != 0 {
        chown(dir, uid, gid)?;
    }
    Ok(())
}

#[cfg(unix)]
fn chown(path: &Path, uid: u32, gid: u32) -> std::io::Result<()> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid))
}

#[cfg(not(unix))]
fn chown(_path: &Path, _uid: u32, _gid: u32) -> std::io::Result<()> {
    Ok(())
}

/// Remove a bundle, logging failures.
pub fn remove(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
            tracing::warn!(bundle = %dir.display(), error = %err, "Failed to remove bundle");
        }
        _ => {}
    }
}
