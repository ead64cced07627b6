//! Load-command decoding and the per-kind rewrite policy.
//!
//! Every offset that is relative to the start of the file and lies after the load-command
//! region moves by the size delta. Offsets relative to a segment, and offsets where zero
//! means "absent", stay put.

use std::mem;

use object::endian::{U32, U64};
use object::macho::{
    BuildVersionCommand, LinkeditDataCommand, Section64, SegmentCommand64, SymtabCommand,
    VersionMinCommand, LC_BUILD_VERSION, LC_DATA_IN_CODE, LC_LINKER_OPTIMIZATION_HINT,
    LC_SEGMENT_64, LC_SYMTAB, LC_VERSION_MIN_IPHONEOS, PLATFORM_IOSSIMULATOR, SECTION_TYPE,
    S_GB_ZEROFILL, S_THREAD_LOCAL_ZEROFILL, S_ZEROFILL,
};
use object::LittleEndian;

use crate::codec::{self, LE};
use crate::error::{Error, Result};
use crate::version::Version;

/// Platform and versions written into the replacement `LC_BUILD_VERSION` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildTarget {
    pub platform: u32,
    pub minos: Version,
    pub sdk: Version,
}

impl BuildTarget {
    /// The iOS simulator platform at the given major versions.
    pub fn simulator(minos: u16, sdk: u16) -> Self {
        Self {
            platform: PLATFORM_IOSSIMULATOR,
            minos: Version::major(minos),
            sdk: Version::major(sdk),
        }
    }

    fn build_version_command(&self) -> BuildVersionCommand<LittleEndian> {
        BuildVersionCommand {
            cmd: U32::new(LE, LC_BUILD_VERSION),
            cmdsize: U32::new(LE, mem::size_of::<BuildVersionCommand<LittleEndian>>() as u32),
            platform: U32::new(LE, self.platform),
            minos: U32::new(LE, self.minos.packed()),
            sdk: U32::new(LE, self.sdk.packed()),
            ntools: U32::new(LE, 0),
        }
    }
}

/// The kind-specific body of a load command.
#[derive(Debug, Clone)]
pub enum Command {
    Segment {
        segment: SegmentCommand64<LittleEndian>,
        sections: Vec<Section64<LittleEndian>>,
    },
    VersionMin(VersionMinCommand<LittleEndian>),
    BuildVersion(BuildVersionCommand<LittleEndian>),
    Symtab(SymtabCommand<LittleEndian>),
    /// `LC_DATA_IN_CODE` or `LC_LINKER_OPTIMIZATION_HINT`.
    LinkeditData(LinkeditDataCommand<LittleEndian>),
    Other(u32),
}

/// One load command: its position in the file, its raw bytes and its decoded body.
#[derive(Debug, Clone)]
pub struct LoadCommand<'data> {
    pub index: u32,
    pub offset: usize,
    pub raw: &'data [u8],
    pub command: Command,
}

impl<'data> LoadCommand<'data> {
    /// Decodes the command occupying exactly `raw` (its declared `cmdsize` bytes).
    pub fn parse(index: u32, offset: usize, raw: &'data [u8]) -> Result<Self> {
        let (cmd, cmdsize) = codec::peek_command(raw, 0)?;
        let command = match cmd {
            LC_SEGMENT_64 => {
                let (segment, sections) = codec::decode_segment(raw)?;
                Command::Segment { segment, sections }
            }
            LC_VERSION_MIN_IPHONEOS => {
                // The size delta assumes the command carries nothing beyond its structure.
                if raw.len() != mem::size_of::<VersionMinCommand<LittleEndian>>() {
                    return Err(Error::MalformedCommand {
                        index,
                        offset,
                        cmdsize,
                    });
                }
                Command::VersionMin(codec::decode(raw, 0)?)
            }
            LC_BUILD_VERSION => Command::BuildVersion(codec::decode(raw, 0)?),
            LC_SYMTAB => Command::Symtab(codec::decode(raw, 0)?),
            LC_DATA_IN_CODE | LC_LINKER_OPTIMIZATION_HINT => {
                Command::LinkeditData(codec::decode(raw, 0)?)
            }
            other => Command::Other(other),
        };
        Ok(Self {
            index,
            offset,
            raw,
            command,
        })
    }

    pub fn cmd(&self) -> u32 {
        match &self.command {
            Command::Segment { .. } => LC_SEGMENT_64,
            Command::VersionMin(_) => LC_VERSION_MIN_IPHONEOS,
            Command::BuildVersion(_) => LC_BUILD_VERSION,
            Command::Symtab(_) => LC_SYMTAB,
            Command::LinkeditData(c) => c.cmd.get(LE),
            Command::Other(cmd) => *cmd,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.cmd() {
            LC_SEGMENT_64 => "LC_SEGMENT_64",
            LC_VERSION_MIN_IPHONEOS => "LC_VERSION_MIN_IPHONEOS",
            LC_BUILD_VERSION => "LC_BUILD_VERSION",
            LC_SYMTAB => "LC_SYMTAB",
            LC_DATA_IN_CODE => "LC_DATA_IN_CODE",
            LC_LINKER_OPTIMIZATION_HINT => "LC_LINKER_OPTIMIZATION_HINT",
            _ => "other",
        }
    }

    /// Re-encodes the decoded body over the raw bytes. Bytes past the fixed structure are
    /// carried over unchanged.
    pub fn encode(&self) -> Vec<u8> {
        self.encode_body(&self.command)
    }

    fn encode_body(&self, command: &Command) -> Vec<u8> {
        let head = match command {
            Command::Segment { segment, sections } => codec::encode_segment(segment, sections),
            Command::VersionMin(c) => codec::encode(c),
            Command::BuildVersion(c) => codec::encode(c),
            Command::Symtab(c) => codec::encode(c),
            Command::LinkeditData(c) => codec::encode(c),
            Command::Other(_) => return self.raw.to_vec(),
        };
        let mut out = self.raw.to_vec();
        out[..head.len()].copy_from_slice(&head);
        out
    }

    /// Produces the replacement bytes for this command.
    pub fn rewrite(&self, delta: u32, target: &BuildTarget) -> Result<Vec<u8>> {
        let command = match &self.command {
            Command::Segment { segment, sections } => {
                tracing::trace!(
                    "shifting segment '{}' and {} sections",
                    codec::fixed_name(&segment.segname),
                    sections.len()
                );
                let mut segment = *segment;
                shift_u64(&mut segment.fileoff, delta, "fileoff")?;
                shift_u64(&mut segment.filesize, delta, "filesize")?;
                shift_u64(&mut segment.vmsize, delta, "vmsize")?;
                let sections = sections
                    .iter()
                    .map(|section| shift_section(section, delta))
                    .collect::<Result<Vec<_>>>()?;
                Command::Segment { segment, sections }
            }
            Command::VersionMin(_) => {
                return Ok(codec::encode(&target.build_version_command()));
            }
            Command::BuildVersion(_) => {
                return Err(Error::AlreadyPatched { index: self.index });
            }
            Command::Symtab(symtab) => {
                let mut symtab = *symtab;
                shift_u32(&mut symtab.symoff, delta, "LC_SYMTAB", "symoff")?;
                shift_u32(&mut symtab.stroff, delta, "LC_SYMTAB", "stroff")?;
                Command::Symtab(symtab)
            }
            Command::LinkeditData(data) => {
                let mut data = *data;
                shift_u32(&mut data.dataoff, delta, self.kind_name(), "dataoff")?;
                Command::LinkeditData(data)
            }
            Command::Other(cmd) => {
                tracing::trace!("passing through load command {:#x} unchanged", cmd);
                return Ok(self.raw.to_vec());
            }
        };
        Ok(self.encode_body(&command))
    }
}

/// Zero-fill sections occupy no file bytes, so their offsets never move.
pub fn is_zero_fill(section: &Section64<LittleEndian>) -> bool {
    matches!(
        section.flags.get(LE) & SECTION_TYPE,
        S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
    )
}

fn shift_section(
    section: &Section64<LittleEndian>,
    delta: u32,
) -> Result<Section64<LittleEndian>> {
    let mut section = *section;
    if is_zero_fill(&section) {
        return Ok(section);
    }
    shift_u32(&mut section.offset, delta, "section_64", "offset")?;
    // A zero reloff means the section has no relocations.
    if section.reloff.get(LE) != 0 {
        shift_u32(&mut section.reloff, delta, "section_64", "reloff")?;
    }
    Ok(section)
}

fn shift_u32(
    field: &mut U32<LittleEndian>,
    delta: u32,
    command: &'static str,
    name: &'static str,
) -> Result<()> {
    let value = field
        .get(LE)
        .checked_add(delta)
        .ok_or(Error::OffsetOverflow {
            command,
            field: name,
        })?;
    field.set(LE, value);
    Ok(())
}

fn shift_u64(field: &mut U64<LittleEndian>, delta: u32, name: &'static str) -> Result<()> {
    let value = field
        .get(LE)
        .checked_add(u64::from(delta))
        .ok_or(Error::OffsetOverflow {
            command: "LC_SEGMENT_64",
            field: name,
        })?;
    field.set(LE, value);
    Ok(())
}
