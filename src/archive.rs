//! Static archive patching.
//!
//! Archives built from many source trees routinely contain several members with the same
//! name. Archivers can only address members by name, so members are patched in rounds:
//! each round extracts the first remaining occurrence of every name still in play, patches
//! the copies, then removes those occurrences in bulk. After the last round the patched
//! copies are appended in processing order.
//!
//! All archiver operations run against a private working copy of the archive, which only
//! replaces the original once every member has been patched.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::patcher::{self, MachFile};

pub mod ar;

/// The four archive operations the coordinator depends on.
pub trait Archiver {
    /// Member names in archive order, one entry per occurrence.
    fn list(&self, archive: &Path) -> Result<Vec<String>>;

    /// Contents of the first remaining member called `name`.
    fn extract_one(&self, archive: &Path, name: &str) -> Result<Vec<u8>>;

    /// Removes members by name in a single invocation. With duplicate names, the leading
    /// occurrence of each listed name is the one removed.
    fn remove(&self, archive: &Path, names: &[String]) -> Result<()>;

    /// Appends member files; each member is named after its file name.
    fn insert(&self, archive: &Path, members: &[PathBuf]) -> Result<()>;
}

/// How member versions are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionPolicy {
    Fixed { minos: u16, sdk: u16 },
    /// Read each member's minimum OS version and use its major for both values.
    Discover,
}

impl VersionPolicy {
    pub fn resolve(&self, data: &[u8]) -> Result<(u16, u16)> {
        match *self {
            VersionPolicy::Fixed { minos, sdk } => Ok((minos, sdk)),
            VersionPolicy::Discover => {
                let (minos, _) = MachFile::parse(data)?.versions()?;
                Ok((minos.major, minos.major))
            }
        }
    }
}

/// One patched occurrence of a member name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchedMember {
    pub name: String,
    pub occurrence: usize,
    pub minos: u16,
    pub sdk: u16,
}

#[derive(Debug, Default)]
pub struct ArchiveReport {
    /// In the order the copies were appended to the archive.
    pub members: Vec<PatchedMember>,
    pub rounds: usize,
}

impl ArchiveReport {
    pub fn copies_of(&self, name: &str) -> usize {
        self.members.iter().filter(|m| m.name == name).count()
    }
}

pub struct ArchivePatcher<'a, A: Archiver + ?Sized> {
    archiver: &'a A,
    versions: VersionPolicy,
}

impl<'a, A: Archiver + ?Sized> ArchivePatcher<'a, A> {
    pub fn new(archiver: &'a A, versions: VersionPolicy) -> Self {
        Self { archiver, versions }
    }

    /// Patches every `.o` member of `archive` in place.
    pub fn patch(&self, archive: &Path) -> Result<ArchiveReport> {
        let dir = match archive.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        // Shard directories live next to the archive so the final rename stays on one
        // filesystem. Dropping `work` removes them whatever the outcome.
        let work = tempfile::Builder::new()
            .prefix(".arm2sim-")
            .tempdir_in(dir)
            .map_err(|source| Error::FileWrite {
                path: dir.to_path_buf(),
                source,
            })?;
        let working_copy = work.path().join("archive.a");
        fs::copy(archive, &working_copy).map_err(|source| Error::FileOpen {
            path: archive.to_path_buf(),
            source,
        })?;

        let report = self.patch_members(archive, &work, &working_copy)?;

        fs::rename(&working_copy, archive).map_err(|source| Error::FileWrite {
            path: archive.to_path_buf(),
            source,
        })?;
        tracing::info!(
            "patched {} members of {} in {} rounds",
            report.members.len(),
            archive.display(),
            report.rounds
        );
        Ok(report)
    }

    fn patch_members(
        &self,
        archive: &Path,
        work: &TempDir,
        working_copy: &Path,
    ) -> Result<ArchiveReport> {
        let mut remaining: BTreeMap<String, usize> = BTreeMap::new();
        for name in self.archiver.list(working_copy).map_err(|e| e.in_file(archive))? {
            if name.ends_with(".o") {
                *remaining.entry(name).or_default() += 1;
            }
        }
        tracing::debug!(
            "{}: {} distinct object names",
            archive.display(),
            remaining.len()
        );

        let mut report = ArchiveReport::default();
        let mut shards = Vec::new();
        let mut round = 0;
        while !remaining.is_empty() {
            let names: Vec<String> = remaining.keys().cloned().collect();
            for name in &names {
                let member = self
                    .patch_member(work.path(), working_copy, name, round)
                    .map_err(|source| Error::Member {
                        archive: archive.to_path_buf(),
                        name: name.clone(),
                        occurrence: round,
                        source: Box::new(source),
                    })?;
                shards.push(shard_path(work.path(), name, round));
                report.members.push(member);
            }
            self.archiver
                .remove(working_copy, &names)
                .map_err(|e| e.in_file(archive))?;
            tracing::debug!("round {}: patched {} members", round, names.len());

            remaining.retain(|_, count| *count > round + 1);
            round += 1;
        }
        report.rounds = round;

        if !shards.is_empty() {
            self.archiver
                .insert(working_copy, &shards)
                .map_err(|e| e.in_file(archive))?;
        }
        Ok(report)
    }

    fn patch_member(
        &self,
        work: &Path,
        working_copy: &Path,
        name: &str,
        round: usize,
    ) -> Result<PatchedMember> {
        let data = self.archiver.extract_one(working_copy, name)?;
        let (minos, sdk) = self.versions.resolve(&data)?;
        let patched = patcher::patch_bytes(&data, minos, sdk)?;

        let path = shard_path(work, name, round);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::FileWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(&path, patched).map_err(|source| Error::FileWrite {
            path: path.clone(),
            source,
        })?;
        tracing::trace!("{} occurrence {} -> {}", name, round, path.display());
        Ok(PatchedMember {
            name: name.to_string(),
            occurrence: round,
            minos,
            sdk,
        })
    }
}

/// `<work>/<round>-<hash>/<name>`: distinct for every `(name, round)` pair, while the file
/// name stays the member name the archiver will record.
fn shard_path(work: &Path, name: &str, round: usize) -> PathBuf {
    let digest = Sha256::digest(name.as_bytes());
    let key: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
    work.join(format!("{}-{}", round, key)).join(name)
}
