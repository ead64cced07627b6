//! `ar`-backed archiver.
//!
//! Members are listed and extracted directly with `object`'s archive parser. Removal and
//! insertion go through the archiver tool, whose path is resolved up front.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use object::read::archive::ArchiveFile;

use super::Archiver;
use crate::error::{Error, Result};
use crate::patcher::map_file;
use crate::utils::{resolve_tool, run_tool};

/// The system archiver.
#[derive(Debug, Clone)]
pub struct ArTool {
    program: PathBuf,
}

impl ArTool {
    /// Resolves `program` (default `ar`) before any archive is touched.
    pub fn locate(program: Option<&Path>) -> Result<Self> {
        let program = resolve_tool(program.unwrap_or_else(|| Path::new("ar")))?;
        tracing::debug!("using archiver {}", program.display());
        Ok(Self { program })
    }
}

impl Archiver for ArTool {
    fn list(&self, archive: &Path) -> Result<Vec<String>> {
        let mmap = map_file(archive)?;
        let parsed = ArchiveFile::parse(&*mmap)
            .map_err(|e| Error::MalformedArchive(e.to_string()).in_file(archive))?;
        let mut names = Vec::new();
        for member in parsed.members() {
            let member =
                member.map_err(|e| Error::MalformedArchive(e.to_string()).in_file(archive))?;
            names.push(String::from_utf8_lossy(member.name()).into_owned());
        }
        Ok(names)
    }

    fn extract_one(&self, archive: &Path, name: &str) -> Result<Vec<u8>> {
        // `ar p` prints every member matching a name, so the first one is read directly.
        let mmap = map_file(archive)?;
        let data = &*mmap;
        let parsed = ArchiveFile::parse(data)
            .map_err(|e| Error::MalformedArchive(e.to_string()).in_file(archive))?;
        for member in parsed.members() {
            let member =
                member.map_err(|e| Error::MalformedArchive(e.to_string()).in_file(archive))?;
            if member.name() == name.as_bytes() {
                let contents = member
                    .data(data)
                    .map_err(|e| Error::MalformedArchive(e.to_string()).in_file(archive))?;
                return Ok(contents.to_vec());
            }
        }
        Err(Error::MemberNotFound {
            name: name.to_string(),
        })
    }

    fn remove(&self, archive: &Path, names: &[String]) -> Result<()> {
        let mut args: Vec<OsString> = vec!["d".into(), archive.into()];
        args.extend(names.iter().map(OsString::from));
        run_tool(&self.program, &args, None)?;
        Ok(())
    }

    fn insert(&self, archive: &Path, members: &[PathBuf]) -> Result<()> {
        let mut args: Vec<OsString> = vec!["cq".into(), archive.into()];
        args.extend(members.iter().map(OsString::from));
        run_tool(&self.program, &args, None)?;
        Ok(())
    }
}
