//! Utility functions.

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Replaces the contents of `path` with `data` by renaming a sibling temporary file over it.
/// The original permissions are kept.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let write_err = |source| Error::FileWrite {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(data).map_err(write_err)?;
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), metadata.permissions()).map_err(write_err)?;
    }
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Finds an executable named `name` on `PATH`. Names containing a path separator are taken
/// as-is and only checked for existence.
pub fn resolve_tool(name: impl AsRef<Path>) -> Result<PathBuf> {
    let name = name.as_ref();
    let not_found = || Error::ToolNotFound {
        name: name.display().to_string(),
    };
    if name.components().count() > 1 {
        return if name.is_file() {
            Ok(name.to_path_buf())
        } else {
            Err(not_found())
        };
    }
    let path = env::var_os("PATH").ok_or_else(not_found)?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
        .ok_or_else(not_found)
}

/// Runs an external tool to completion, turning a non-zero exit into [`Error::Tool`].
pub fn run_tool<I, S>(program: &Path, args: I, cwd: Option<&Path>) -> Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    let mut cmd = Command::new(program);
    cmd.args(&args);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    tracing::trace!("running {} {:?}", program.display(), args);
    let output = cmd.output()?;
    if !output.status.success() {
        return Err(Error::Tool {
            program: program.display().to_string(),
            args: args
                .iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" "),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.o");
        fs::write(&path, b"before").unwrap();
        write_atomic(&path, b"after!").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"after!");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn missing_tool_is_reported_by_name() {
        let err = resolve_tool("definitely-not-a-real-archiver-xyz").unwrap_err();
        assert!(matches!(err, Error::ToolNotFound { ref name } if name == "definitely-not-a-real-archiver-xyz"));
        let err = resolve_tool("/nonexistent/dir/ar").unwrap_err();
        assert!(matches!(err, Error::ToolNotFound { .. }));
    }
}
