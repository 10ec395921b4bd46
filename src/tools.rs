//! Lookup of external programs (`tcpdump`, `tcpreplay`).

use std::env;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::Result;

/// Resolves `name` against `PATH`. A name containing a path separator is checked as is.
///
/// # Errors
/// [`Error::MissingExternalTool`] if no executable file is found.
pub fn find_tool(name: &str) -> Result<PathBuf> {
    let direct = Path::new(name);
    if direct.components().count() > 1 {
        return if is_executable(direct) {
            Ok(direct.to_path_buf())
        } else {
            Err(Error::MissingExternalTool(name.to_string()))
        };
    }

    env::var_os("PATH")
        .and_then(|paths| {
            env::split_paths(&paths)
                .map(|dir| dir.join(name))
                .find(|candidate| is_executable(candidate))
        })
        .ok_or_else(|| Error::MissingExternalTool(name.to_string()))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
