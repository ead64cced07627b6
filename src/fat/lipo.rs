//! `lipo`-backed fat-binary tool.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use super::FatTool;
use crate::error::{Error, Result};
use crate::utils::{resolve_tool, run_tool};

#[derive(Debug, Clone)]
pub struct Lipo {
    program: PathBuf,
}

impl Lipo {
    /// Resolves `program` (default `lipo`) before any binary is touched.
    pub fn locate(program: Option<&Path>) -> Result<Self> {
        let program = resolve_tool(program.unwrap_or_else(|| Path::new("lipo")))?;
        tracing::debug!("using lipo {}", program.display());
        Ok(Self { program })
    }

    fn scratch(binary: &Path) -> Result<tempfile::TempDir> {
        let dir = match binary.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        tempfile::Builder::new()
            .prefix(".lipo-")
            .tempdir_in(dir)
            .map_err(|source| Error::FileWrite {
                path: dir.to_path_buf(),
                source,
            })
    }
}

impl FatTool for Lipo {
    fn thin(&self, binary: &Path, arch: &str) -> Result<Vec<u8>> {
        let scratch = Self::scratch(binary)?;
        let output = scratch.path().join(arch);
        let args: [OsString; 5] = [
            binary.into(),
            "-thin".into(),
            arch.into(),
            "-output".into(),
            output.as_path().into(),
        ];
        run_tool(&self.program, &args, None)?;
        fs::read(&output).map_err(|source| Error::FileOpen {
            path: output,
            source,
        })
    }

    fn replace(&self, binary: &Path, arch: &str, slice: &[u8]) -> Result<()> {
        let scratch = Self::scratch(binary)?;
        let input = scratch.path().join(arch);
        fs::write(&input, slice).map_err(|source| Error::FileWrite {
            path: input.clone(),
            source,
        })?;
        let args: [OsString; 6] = [
            binary.into(),
            "-replace".into(),
            arch.into(),
            input.as_path().into(),
            "-output".into(),
            binary.into(),
        ];
        run_tool(&self.program, &args, None)?;
        Ok(())
    }

    fn archs(&self, binary: &Path) -> Result<Vec<String>> {
        let args: [OsString; 2] = [binary.into(), "-archs".into()];
        let output = run_tool(&self.program, &args, None)?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    fn remove_arch(&self, binary: &Path, arch: &str) -> Result<()> {
        let args: [OsString; 5] = [
            binary.into(),
            "-remove".into(),
            arch.into(),
            "-output".into(),
            binary.into(),
        ];
        run_tool(&self.program, &args, None)?;
        Ok(())
    }
}
