//! Configuration module.
//!
//! This module defines the command-line interface (CLI) using `clap`.
//! External tool paths are part of the configuration so they can be resolved before any
//! file is modified.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::archive::VersionPolicy;

/// Converts arm64 iOS device binaries into arm64 iOS simulator binaries.
///
/// Object files are patched in place by replacing their LC_VERSION_MIN_IPHONEOS
/// command with an LC_BUILD_VERSION command for the simulator platform. Static
/// archives have every object member patched. Linked images inside a framework
/// binary are retargeted with vtool by `slice`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Action,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", help = "Set the logging level")]
    pub log_level: String,

    /// Archiver used for static archives
    #[arg(long, global = true, value_name = "PATH")]
    pub ar: Option<PathBuf>,

    /// Fat-binary tool used by `slice`
    #[arg(long, global = true, value_name = "PATH")]
    pub lipo: Option<PathBuf>,

    /// Build version tool used by `slice` for linked images
    #[arg(long, global = true, value_name = "PATH")]
    pub vtool: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Patch a thin arm64 Mach-O or static archive in place
    Patch {
        /// Thin arm64 object file or static archive
        path: PathBuf,

        /// Minimum iOS major version (defaults to the binary's own)
        #[arg(long)]
        minos: Option<u16>,

        /// SDK major version (defaults to the minimum iOS version)
        #[arg(long)]
        sdk: Option<u16>,
    },

    /// Patch the arm64 slice of a fat framework binary and drop other architectures
    Slice {
        /// Fat framework binary
        binary: PathBuf,

        /// Architectures to keep in the binary
        #[arg(long = "keep-arch", value_name = "ARCH", required = true)]
        keep_archs: Vec<String>,

        /// Directory whose arm64 Swift interfaces should be retargeted to the simulator
        #[arg(long, value_name = "DIR")]
        interfaces: Option<PathBuf>,
    },

    /// Print the minimum OS and SDK versions of a thin arm64 Mach-O
    Versions { path: PathBuf },
}

/// Fixed versions when either flag is given, otherwise discovered from each binary.
pub fn version_policy(minos: Option<u16>, sdk: Option<u16>) -> VersionPolicy {
    match (minos, sdk) {
        (Some(minos), Some(sdk)) => VersionPolicy::Fixed { minos, sdk },
        (Some(v), None) | (None, Some(v)) => VersionPolicy::Fixed { minos: v, sdk: v },
        (None, None) => VersionPolicy::Discover,
    }
}
