//! Error types for arm64 simulator patching.
//!
//! Errors fall into three categories (see [`Category`]): malformed or unexpected binary
//! shapes, misuse such as patching a file twice, and I/O or external tool failures.
//! Wrapper variants attach the file path or archive member that failed.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification used by callers that only care about recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Malformed or unexpected binary shape. The input is left untouched.
    Format,
    /// Operation attempted in the wrong state, e.g. re-patching.
    State,
    /// Read/write or external tool failure.
    Io,
}

/// The main error type for patching operations.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not find `{name}` on PATH")]
    ToolNotFound { name: String },

    #[error("`{program} {args}` failed ({status}): {stderr}")]
    Tool {
        program: String,
        args: String,
        status: String,
        stderr: String,
    },

    // ==================== Mach-O Errors ====================
    #[error("truncated input reading {what} at offset {offset:#x}: need {needed} bytes, {available} available")]
    TruncatedInput {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("not a thin arm64 Mach-O (magic {magic:#010x}, cputype {cputype:#x}). {hint}")]
    WrongFormat {
        magic: u32,
        cputype: u32,
        hint: &'static str,
    },

    #[error("load command #{index} at offset {offset:#x} has invalid size {cmdsize}")]
    MalformedCommand {
        index: u32,
        offset: usize,
        cmdsize: u32,
    },

    #[error("header declares {declared} bytes of load commands but commands occupy {actual}")]
    CommandSizeMismatch { declared: u32, actual: usize },

    #[error("expected exactly one LC_VERSION_MIN_IPHONEOS command, found {found}")]
    VersionMinCount { found: usize },

    #[error("shifting {field} of {command} overflows")]
    OffsetOverflow {
        command: &'static str,
        field: &'static str,
    },

    #[error("load command #{index} ({cmd:#x}) of a linked image (filetype {filetype}) holds file offsets that cannot be moved; retarget linked images with vtool")]
    LinkedImage { filetype: u32, index: u32, cmd: u32 },

    #[error("neither LC_VERSION_MIN_IPHONEOS nor LC_BUILD_VERSION is present")]
    VersionInfoMissing,

    // ==================== State Errors ====================
    #[error("binary already contains an LC_BUILD_VERSION load command (#{index})")]
    AlreadyPatched { index: u32 },

    // ==================== Archive Errors ====================
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("archive has no remaining member named '{name}'")]
    MemberNotFound { name: String },

    // ==================== Context Wrappers ====================
    #[error("{path}: {source}")]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("{archive}({name}) occurrence {occurrence}: {source}")]
    Member {
        archive: PathBuf,
        name: String,
        occurrence: usize,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps `self` with the path of the file being processed.
    pub fn in_file(self, path: impl Into<PathBuf>) -> Self {
        Error::InFile {
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping context wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::InFile { source, .. } | Error::Member { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn category(&self) -> Category {
        match self.root() {
            Error::Io(_)
            | Error::FileOpen { .. }
            | Error::FileWrite { .. }
            | Error::ToolNotFound { .. }
            | Error::Tool { .. } => Category::Io,
            Error::AlreadyPatched { .. } => Category::State,
            _ => Category::Format,
        }
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
