//! arm64 device to arm64 simulator patching.
//!
//! This library rewrites the load commands of arm64 iOS Mach-O binaries so that the same
//! machine code is accepted as an iOS simulator build. It is organized into several modules:
//! - `codec`: Fixed-layout Mach-O structure decoding and encoding.
//! - `command`: Load-command decoding and the per-kind rewrite policy.
//! - `patcher`: Single-file reassembly and atomic write-back.
//! - `archive`: Static archive coordination, including duplicate member names.
//! - `fat`: Multi-architecture container and build-version tools (`lipo`, `vtool`).
//! - `slice`: Patching the arm64 slice of a framework binary.
//! - `config`: CLI configuration.

pub mod archive;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod fat;
pub mod patcher;
pub mod slice;
pub mod utils;
pub mod version;

pub use error::{Error, Result};
pub use patcher::{patch_bytes, patch_file, MachFile};
pub use version::Version;
