//! `vtool`-backed build version rewriting for linked images.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::BuildVersionTool;
use crate::command::BuildTarget;
use crate::error::Result;
use crate::slice::ARM64;
use crate::utils::{resolve_tool, run_tool};

#[derive(Debug, Clone)]
pub struct Vtool {
    program: PathBuf,
}

impl Vtool {
    /// Resolves `program` (default `vtool`) before any binary is touched.
    pub fn locate(program: Option<&Path>) -> Result<Self> {
        let program = resolve_tool(program.unwrap_or_else(|| Path::new("vtool")))?;
        tracing::debug!("using vtool {}", program.display());
        Ok(Self { program })
    }
}

/// Arguments for `vtool -set-build-version <platform> <minos> <sdk> -replace`, writing the
/// result over the input.
fn set_build_version_args(binary: &Path, target: &BuildTarget) -> Vec<OsString> {
    vec![
        "-arch".into(),
        ARM64.into(),
        "-set-build-version".into(),
        target.platform.to_string().into(),
        target.minos.to_string().into(),
        target.sdk.to_string().into(),
        "-replace".into(),
        "-output".into(),
        binary.into(),
        binary.into(),
    ]
}

impl BuildVersionTool for Vtool {
    fn set_build_version(&self, binary: &Path, target: &BuildTarget) -> Result<()> {
        run_tool(&self.program, set_build_version_args(binary, target), None)?;
        tracing::debug!(
            "set build version of {} to platform {} minos {} sdk {}",
            binary.display(),
            target.platform,
            target.minos,
            target.sdk
        );
        Ok(())
    }
}
