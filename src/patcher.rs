//! Single-file patching.
//!
//! This module reassembles an arm64 Mach-O so that it targets the iOS simulator:
//! 1. Read the header and reject anything that is not a thin arm64 Mach-O.
//! 2. Read each load command using the size declared in its prefix.
//! 3. Rewrite every command in order (see [`crate::command`]).
//! 4. Reassemble header, commands and the untouched program data.
//! 5. Write the result back atomically.

use std::fs::File;
use std::mem;
use std::path::Path;

use memmap2::Mmap;
use object::macho::{
    MachHeader64, CPU_TYPE_ARM64, FAT_MAGIC, FAT_MAGIC_64, MH_CIGAM_64, MH_OBJECT,
};
use object::{BigEndian, LittleEndian};

use crate::codec::{self, COMMAND_PREFIX_SIZE, LE, SIZE_DELTA};
use crate::command::{BuildTarget, Command, LoadCommand};
use crate::error::{Error, Result};
use crate::utils::write_atomic;
use crate::version::Version;

const HEADER_SIZE: usize = mem::size_of::<MachHeader64<LittleEndian>>();

/// A decoded thin arm64 Mach-O borrowing from its file contents.
pub struct MachFile<'data> {
    pub header: MachHeader64<LittleEndian>,
    pub commands: Vec<LoadCommand<'data>>,
    /// Everything after the load-command region.
    pub program: &'data [u8],
}

impl<'data> MachFile<'data> {
    pub fn parse(data: &'data [u8]) -> Result<Self> {
        let header: MachHeader64<LittleEndian> = codec::decode(data, 0)?;
        // The magic field is declared big-endian; a little-endian file reads back byte-swapped.
        let magic = header.magic.get(BigEndian);
        let cputype = header.cputype.get(LE);
        if magic != MH_CIGAM_64 || cputype != CPU_TYPE_ARM64 {
            return Err(Error::WrongFormat {
                magic,
                cputype,
                hint: format_hint(data, magic),
            });
        }

        let ncmds = header.ncmds.get(LE);
        // `ncmds` is untrusted; never reserve more commands than the bytes could hold.
        let room = (data.len() - HEADER_SIZE) / COMMAND_PREFIX_SIZE;
        let mut commands = Vec::with_capacity((ncmds as usize).min(room));
        let mut offset = HEADER_SIZE;
        for index in 0..ncmds {
            let (_, cmdsize) = codec::peek_command(data, offset)?;
            let size = cmdsize as usize;
            if size < COMMAND_PREFIX_SIZE {
                return Err(Error::MalformedCommand {
                    index,
                    offset,
                    cmdsize,
                });
            }
            let raw = data
                .get(offset..offset + size)
                .ok_or(Error::TruncatedInput {
                    what: "load command",
                    offset,
                    needed: size,
                    available: data.len() - offset,
                })?;
            commands.push(LoadCommand::parse(index, offset, raw)?);
            offset += size;
        }

        let declared = header.sizeofcmds.get(LE);
        let actual = offset - HEADER_SIZE;
        if declared as usize != actual {
            return Err(Error::CommandSizeMismatch { declared, actual });
        }

        Ok(Self {
            header,
            commands,
            program: &data[offset..],
        })
    }

    /// Reads the minimum OS and SDK versions, preferring `LC_VERSION_MIN_IPHONEOS` over
    /// `LC_BUILD_VERSION`.
    pub fn versions(&self) -> Result<(Version, Version)> {
        let version_min = self.commands.iter().find_map(|c| match &c.command {
            Command::VersionMin(v) => Some((v.version.get(LE), v.sdk.get(LE))),
            _ => None,
        });
        let build_version = || {
            self.commands.iter().find_map(|c| match &c.command {
                Command::BuildVersion(b) => Some((b.minos.get(LE), b.sdk.get(LE))),
                _ => None,
            })
        };
        let (minos, sdk) = version_min
            .or_else(build_version)
            .ok_or(Error::VersionInfoMissing)?;
        Ok((Version::from_packed(minos), Version::from_packed(sdk)))
    }

    /// Rewrites every command for `target` and reassembles the file.
    pub fn rewrite(&self, target: &BuildTarget) -> Result<Vec<u8>> {
        if let Some(existing) = self
            .commands
            .iter()
            .find(|c| matches!(c.command, Command::BuildVersion(_)))
        {
            return Err(Error::AlreadyPatched {
                index: existing.index,
            });
        }
        let found = self
            .commands
            .iter()
            .filter(|c| matches!(c.command, Command::VersionMin(_)))
            .count();
        if found != 1 {
            return Err(Error::VersionMinCount { found });
        }
        let filetype = self.header.filetype.get(LE);
        if filetype != MH_OBJECT {
            if let Some(unknown) = self
                .commands
                .iter()
                .find(|c| matches!(c.command, Command::Other(_)))
            {
                return Err(Error::LinkedImage {
                    filetype,
                    index: unknown.index,
                    cmd: unknown.cmd(),
                });
            }
        }

        let mut rewritten = Vec::with_capacity(self.header.sizeofcmds.get(LE) as usize);
        for command in &self.commands {
            let bytes = command.rewrite(SIZE_DELTA, target)?;
            tracing::trace!(
                "command #{} {}: {} -> {} bytes",
                command.index,
                command.kind_name(),
                command.raw.len(),
                bytes.len()
            );
            rewritten.extend_from_slice(&bytes);
        }

        let mut header = self.header;
        header.sizeofcmds.set(LE, rewritten.len() as u32);

        let mut out = Vec::with_capacity(HEADER_SIZE + rewritten.len() + self.program.len());
        out.extend_from_slice(&codec::encode(&header));
        out.extend_from_slice(&rewritten);
        out.extend_from_slice(self.program);
        Ok(out)
    }
}

/// Converts an in-memory arm64 device Mach-O into its simulator form.
pub fn patch_bytes(data: &[u8], minos: u16, sdk: u16) -> Result<Vec<u8>> {
    MachFile::parse(data)?.rewrite(&BuildTarget::simulator(minos, sdk))
}

/// Patches the Mach-O at `path` in place. The file is untouched unless patching succeeds.
pub fn patch_file(path: &Path, minos: u16, sdk: u16) -> Result<()> {
    let patched = {
        let mmap = map_file(path)?;
        patch_bytes(&mmap, minos, sdk).map_err(|e| e.in_file(path))?
    };
    write_atomic(path, &patched)?;
    tracing::debug!(
        "patched {} for iOS simulator (minos {}, sdk {})",
        path.display(),
        minos,
        sdk
    );
    Ok(())
}

/// Reads the minimum OS and SDK versions of the Mach-O at `path`.
pub fn read_versions(path: &Path) -> Result<(Version, Version)> {
    let mmap = map_file(path)?;
    MachFile::parse(&mmap)
        .and_then(|file| file.versions())
        .map_err(|e| e.in_file(path))
}

pub(crate) fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).map_err(|source| Error::FileOpen {
        path: path.to_path_buf(),
        source,
    })?;
    // SAFETY: the mapping is read-only and dropped before the file is replaced.
    unsafe { Mmap::map(&file) }.map_err(|source| Error::FileOpen {
        path: path.to_path_buf(),
        source,
    })
}

fn format_hint(data: &[u8], magic: u32) -> &'static str {
    if data.starts_with(&object::archive::MAGIC) {
        "This is a static archive; unarchive it (ar x) or patch it as an archive."
    } else if magic == FAT_MAGIC || magic == FAT_MAGIC_64 {
        "This is a multi-architecture file; thin it first (lipo -thin arm64)."
    } else {
        "Try thinning (lipo -thin arm64) or unarchiving (ar x) first."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object::endian::U32;
    use object::macho::{LC_VERSION_MIN_IPHONEOS, MH_DYLIB, MH_MAGIC_64};

    fn header(cputype: u32, ncmds: u32, sizeofcmds: u32) -> Vec<u8> {
        image(MH_OBJECT, cputype, ncmds, sizeofcmds)
    }

    fn image(filetype: u32, cputype: u32, ncmds: u32, sizeofcmds: u32) -> Vec<u8> {
        codec::encode(&MachHeader64::<LittleEndian> {
            magic: U32::new(BigEndian, MH_CIGAM_64),
            cputype: U32::new(LE, cputype),
            cpusubtype: U32::new(LE, 0),
            filetype: U32::new(LE, filetype),
            ncmds: U32::new(LE, ncmds),
            sizeofcmds: U32::new(LE, sizeofcmds),
            flags: U32::new(LE, 0),
            reserved: U32::new(LE, 0),
        })
    }

    #[test]
    fn rejects_big_endian_magic() {
        let mut data = header(CPU_TYPE_ARM64, 0, 0);
        data[..4].copy_from_slice(&MH_MAGIC_64.to_be_bytes());
        let err = MachFile::parse(&data).err().unwrap();
        assert!(matches!(err, Error::WrongFormat { .. }));
    }

    #[test]
    fn hints_at_archives_and_fat_files() {
        let mut archive = b"!<arch>\n".to_vec();
        archive.resize(64, b' ');
        let err = MachFile::parse(&archive).err().unwrap();
        assert!(err.to_string().contains("static archive"));

        let mut fat = FAT_MAGIC.to_be_bytes().to_vec();
        fat.resize(64, 0);
        let err = MachFile::parse(&fat).err().unwrap();
        assert!(err.to_string().contains("lipo -thin arm64"));
    }

    #[test]
    fn rejects_undersized_command() {
        let mut data = header(CPU_TYPE_ARM64, 1, 4);
        data.extend([0x19, 0, 0, 0, 4, 0, 0, 0]);
        let err = MachFile::parse(&data).err().unwrap();
        assert!(matches!(
            err,
            Error::MalformedCommand {
                index: 0,
                offset: 32,
                cmdsize: 4
            }
        ));
    }

    #[test]
    fn rejects_command_running_past_end() {
        let mut data = header(CPU_TYPE_ARM64, 1, 64);
        data.extend([0x26, 0, 0, 0, 64, 0, 0, 0]);
        let err = MachFile::parse(&data).err().unwrap();
        assert!(matches!(err, Error::TruncatedInput { needed: 64, .. }));
    }

    #[test]
    fn rejects_sizeofcmds_mismatch() {
        let mut data = header(CPU_TYPE_ARM64, 1, 24);
        data.extend([0x26, 0, 0, 0, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let err = MachFile::parse(&data).err().unwrap();
        assert!(matches!(
            err,
            Error::CommandSizeMismatch {
                declared: 24,
                actual: 16
            }
        ));
    }

    #[test]
    fn missing_version_min_is_refused() {
        let mut data = header(CPU_TYPE_ARM64, 1, 16);
        data.extend([0x26, 0, 0, 0, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let file = MachFile::parse(&data).unwrap();
        assert!(matches!(
            file.versions().unwrap_err(),
            Error::VersionInfoMissing
        ));
        assert!(matches!(
            file.rewrite(&BuildTarget::simulator(13, 13)).unwrap_err(),
            Error::VersionMinCount { found: 0 }
        ));
    }

    #[test]
    fn huge_command_count_is_truncation() {
        let data = header(CPU_TYPE_ARM64, u32::MAX, 0);
        let err = patch_bytes(&data, 13, 13).unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedInput {
                offset: 32,
                available: 0,
                ..
            }
        ));
    }

    fn version_min(minos: u16) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&LC_VERSION_MIN_IPHONEOS.to_le_bytes());
        out[4..8].copy_from_slice(&16u32.to_le_bytes());
        out[8..12].copy_from_slice(&(u32::from(minos) << 16).to_le_bytes());
        out[12..].copy_from_slice(&(u32::from(minos) << 16).to_le_bytes());
        out
    }

    #[test]
    fn linked_image_with_unmovable_offsets_is_refused() {
        let function_starts = [0x26, 0, 0, 0, 16, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];

        let mut dylib = image(MH_DYLIB, CPU_TYPE_ARM64, 2, 32);
        dylib.extend(version_min(13));
        dylib.extend(function_starts);
        let err = patch_bytes(&dylib, 13, 13).unwrap_err();
        assert!(matches!(
            err,
            Error::LinkedImage {
                filetype: MH_DYLIB,
                index: 1,
                cmd: 0x26
            }
        ));
        assert_eq!(err.category(), crate::error::Category::Format);

        let mut object = header(CPU_TYPE_ARM64, 2, 32);
        object.extend(version_min(13));
        object.extend(function_starts);
        assert_eq!(patch_bytes(&object, 13, 13).unwrap().len(), object.len() + 8);
    }
}
