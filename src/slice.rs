//! Framework slice orchestration.
//!
//! Turns the arm64 device slice of a framework binary into an arm64 simulator slice:
//! the arm64 slice is thinned out and retargeted, then put back. Static slices have every
//! object member patched; linked images have their build version replaced by `vtool`,
//! since their load commands cannot grow in place. Architectures the slice does not
//! advertise are then dropped, and Swift module interfaces are retargeted to the simulator
//! triple.

use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use object::macho::PLATFORM_IOSSIMULATOR;
use regex::Regex;
use walkdir::WalkDir;

use crate::archive::{ArchivePatcher, Archiver, VersionPolicy};
use crate::command::BuildTarget;
use crate::error::{Error, Result};
use crate::fat::{BuildVersionTool, FatTool};
use crate::patcher;

pub const ARM64: &str = "arm64";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// The slice was a static archive of object files.
    Static,
    /// The slice was a single linked Mach-O image.
    Dynamic,
}

pub struct SlicePatcher<'a, F, V, A>
where
    F: FatTool + ?Sized,
    V: BuildVersionTool + ?Sized,
    A: Archiver + ?Sized,
{
    fat: &'a F,
    vtool: &'a V,
    archiver: &'a A,
}

impl<'a, F, V, A> SlicePatcher<'a, F, V, A>
where
    F: FatTool + ?Sized,
    V: BuildVersionTool + ?Sized,
    A: Archiver + ?Sized,
{
    pub fn new(fat: &'a F, vtool: &'a V, archiver: &'a A) -> Self {
        Self {
            fat,
            vtool,
            archiver,
        }
    }

    /// Patches the arm64 slice of `binary` and removes every architecture not listed in
    /// `supported_archs`.
    pub fn patch(&self, binary: &Path, supported_archs: &[String]) -> Result<Linkage> {
        let slice = self.fat.thin(binary, ARM64)?;
        let dir = match binary.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let scratch = tempfile::Builder::new()
            .prefix(".arm64-slice-")
            .tempdir_in(dir)
            .map_err(|source| Error::FileWrite {
                path: dir.to_path_buf(),
                source,
            })?;

        let (linkage, extracted) = if slice.starts_with(&object::archive::MAGIC) {
            (Linkage::Static, scratch.path().join("arm64.a"))
        } else {
            (Linkage::Dynamic, scratch.path().join("arm64.dylib"))
        };
        fs::write(&extracted, &slice).map_err(|source| Error::FileWrite {
            path: extracted.clone(),
            source,
        })?;

        match linkage {
            Linkage::Static => {
                ArchivePatcher::new(self.archiver, VersionPolicy::Discover).patch(&extracted)?;
            }
            Linkage::Dynamic => {
                let (minos, _) = patcher::read_versions(&extracted)?;
                let target = BuildTarget {
                    platform: PLATFORM_IOSSIMULATOR,
                    minos,
                    sdk: minos,
                };
                self.vtool.set_build_version(&extracted, &target)?;
            }
        }

        let patched = fs::read(&extracted).map_err(|source| Error::FileOpen {
            path: extracted.clone(),
            source,
        })?;
        self.fat.replace(binary, ARM64, &patched)?;
        tracing::info!("patched {:?} arm64 slice of {}", linkage, binary.display());

        self.remove_unsupported(binary, supported_archs)?;
        Ok(linkage)
    }

    /// Drops every architecture of `binary` that is not in `supported_archs`, returning the
    /// removed ones.
    pub fn remove_unsupported(
        &self,
        binary: &Path,
        supported_archs: &[String],
    ) -> Result<Vec<String>> {
        let unsupported: Vec<String> = self
            .fat
            .archs(binary)?
            .into_iter()
            .filter(|arch| !supported_archs.contains(arch))
            .collect();
        for arch in &unsupported {
            tracing::debug!("removing {} from {}", arch, binary.display());
            self.fat.remove_arch(binary, arch)?;
        }
        Ok(unsupported)
    }
}

fn device_target() -> &'static Regex {
    static TARGET: OnceLock<Regex> = OnceLock::new();
    TARGET.get_or_init(|| {
        Regex::new(r"target arm64-apple-ios([0-9.]+) ").expect("device target pattern is valid")
    })
}

/// Rewrites `target arm64-apple-iosX ` to `target arm64-apple-iosX-simulator ` in every
/// `arm64*.swiftinterface` under `dir`. Returns the number of files changed.
pub fn retarget_swift_interfaces(dir: &Path) -> Result<usize> {
    let target = device_target();
    let mut changed = 0;
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let name = entry.file_name().to_string_lossy();
        if !entry.file_type().is_file()
            || !name.starts_with(ARM64)
            || !name.ends_with(".swiftinterface")
        {
            continue;
        }
        let path = entry.path();
        let text = fs::read_to_string(path).map_err(|source| Error::FileOpen {
            path: path.to_path_buf(),
            source,
        })?;
        let rewritten = target.replace_all(&text, "target arm64-apple-ios${1}-simulator ");
        if let Cow::Owned(rewritten) = rewritten {
            fs::write(path, rewritten).map_err(|source| Error::FileWrite {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::debug!("retargeted {}", path.display());
            changed += 1;
        }
    }
    Ok(changed)
}
