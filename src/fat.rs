//! Multi-architecture container boundary.
//!
//! The `FatTool` trait covers the four operations slice orchestration needs from a
//! fat-binary tool, with `lipo` as the backend. Linked images cannot have their load
//! commands regrown in place, so their platform is rewritten by a `BuildVersionTool`
//! (`vtool`) instead.

use std::path::Path;

use crate::command::BuildTarget;
use crate::error::Result;

pub mod lipo;
pub mod vtool;

pub trait FatTool {
    /// Extracts the slice for `arch` as a thin binary.
    fn thin(&self, binary: &Path, arch: &str) -> Result<Vec<u8>>;

    /// Replaces the slice for `arch` with `slice`.
    fn replace(&self, binary: &Path, arch: &str, slice: &[u8]) -> Result<()>;

    /// Architectures present in `binary`.
    fn archs(&self, binary: &Path) -> Result<Vec<String>>;

    fn remove_arch(&self, binary: &Path, arch: &str) -> Result<()>;
}

pub trait BuildVersionTool {
    /// Replaces the version commands of the thin image at `binary` with one
    /// `LC_BUILD_VERSION` for `target`.
    fn set_build_version(&self, binary: &Path, target: &BuildTarget) -> Result<()>;
}
