//! Entry point for arm2sim.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Initialize logging with `tracing-subscriber`.
//! 3. Resolve external tools before touching any file.
//! 4. Dispatch to single-file, archive or slice patching.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use arm2sim::archive::ar::ArTool;
use arm2sim::archive::{ArchivePatcher, VersionPolicy};
use arm2sim::config::{version_policy, Action, Config};
use arm2sim::fat::lipo::Lipo;
use arm2sim::fat::vtool::Vtool;
use arm2sim::patcher;
use arm2sim::slice::{retarget_swift_interfaces, SlicePatcher};

fn main() -> Result<()> {
    let config = Config::parse();
    setup_logging(&config.log_level);

    match config.command {
        Action::Patch { path, minos, sdk } => {
            patch(&path, version_policy(minos, sdk), config.ar.as_deref())
        }
        Action::Slice {
            binary,
            keep_archs,
            interfaces,
        } => slice(
            &binary,
            &keep_archs,
            interfaces,
            config.lipo.as_deref(),
            config.vtool.as_deref(),
            config.ar.as_deref(),
        ),
        Action::Versions { path } => {
            let (minos, sdk) = patcher::read_versions(&path)?;
            println!("minos {} sdk {}", minos, sdk);
            Ok(())
        }
    }
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn patch(path: &Path, policy: VersionPolicy, ar: Option<&Path>) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

    if data.starts_with(&object::archive::MAGIC) {
        let archiver = ArTool::locate(ar)?;
        let report = ArchivePatcher::new(&archiver, policy)
            .patch(path)
            .with_context(|| format!("failed to patch archive {}", path.display()))?;
        println!(
            "Patched {} members of {} for the arm64 simulator",
            report.members.len(),
            path.display()
        );
        return Ok(());
    }

    let (minos, sdk) = policy
        .resolve(&data)
        .with_context(|| format!("failed to read versions of {}", path.display()))?;
    drop(data);
    patcher::patch_file(path, minos, sdk)?;
    println!(
        "Patched {} for the arm64 simulator (minos {}, sdk {})",
        path.display(),
        minos,
        sdk
    );
    Ok(())
}

fn slice(
    binary: &Path,
    keep_archs: &[String],
    interfaces: Option<PathBuf>,
    lipo: Option<&Path>,
    vtool: Option<&Path>,
    ar: Option<&Path>,
) -> Result<()> {
    let lipo = Lipo::locate(lipo)?;
    let vtool = Vtool::locate(vtool)?;
    let archiver = ArTool::locate(ar)?;

    let linkage = SlicePatcher::new(&lipo, &vtool, &archiver)
        .patch(binary, keep_archs)
        .with_context(|| format!("failed to patch arm64 slice of {}", binary.display()))?;
    println!("Patched {:?} arm64 slice of {}", linkage, binary.display());

    if let Some(dir) = interfaces {
        let changed = retarget_swift_interfaces(&dir)?;
        println!("Retargeted {} Swift interfaces", changed);
    }
    Ok(())
}
