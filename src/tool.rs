// Laminate layer builder.

//! Explicit `PATH` search for external tools.
//!
//! External archivers are spawned directly via `std::process::Command`,
//! which does not go through a shell, so shell-style `PATH` lookup never
//! happens implicitly. This module does the lookup ourselves, honoring
//! absolute paths, relative paths, and bare names the same way a shell
//! would, without actually invoking one.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Resolve `name` to an executable path.
///
/// - Absolute or relative (contains a `/`) names are used as-is if they
///   point at an executable file.
/// - Bare names are searched for on each entry of `PATH`, in order.
pub fn resolve_tool(name: &str) -> Result<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return if is_executable_file(candidate) {
            Ok(candidate.to_path_buf())
        } else {
            Err(not_found(name))
        };
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if is_executable_file(&candidate) {
            return Ok(candidate);
        }
    }
    Err(not_found(name))
}

fn not_found(name: &str) -> Error {
    Error::tool_missing(
        name,
        format!("{name} must be installed and on PATH"),
    )
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}
