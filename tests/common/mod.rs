//! Shared fixtures: a synthetic arm64 object file and a file-backed archiver.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use arm2sim::archive::Archiver;
use arm2sim::codec::{encode, encode_segment, LE};
use arm2sim::{Error, Result};
use object::endian::{U32, U64};
use object::macho::{
    LinkeditDataCommand, MachHeader64, Section64, SegmentCommand64, SymtabCommand,
    VersionMinCommand, CPU_TYPE_ARM64, LC_DATA_IN_CODE, LC_SEGMENT_64, LC_SYMTAB,
    LC_VERSION_MIN_IPHONEOS, MH_CIGAM_64, MH_OBJECT, S_ATTR_PURE_INSTRUCTIONS, S_REGULAR,
    S_ZEROFILL,
};
use object::{BigEndian, LittleEndian};

pub const SIZEOFCMDS: u32 = 232 + 16 + 24 + 16;
pub const TEXT_OFFSET: u32 = 32 + SIZEOFCMDS;
pub const TEXT_SIZE: usize = 16;
pub const RELOC_OFFSET: u32 = TEXT_OFFSET + TEXT_SIZE as u32;
pub const DATA_IN_CODE_OFFSET: u32 = RELOC_OFFSET + 8;
pub const SYMBOL_OFFSET: u32 = DATA_IN_CODE_OFFSET + 8;
pub const STRING_OFFSET: u32 = SYMBOL_OFFSET + 16;
pub const FILE_SIZE: usize = STRING_OFFSET as usize + 16;

/// Options for [`object_file`].
#[derive(Clone, Copy)]
pub struct Fixture {
    /// Byte repeated across `__text`, so copies can be told apart.
    pub payload: u8,
    pub cputype: u32,
    pub minos: u16,
    pub sdk: u16,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            payload: 0xd5,
            cputype: CPU_TYPE_ARM64,
            minos: 13,
            sdk: 13,
        }
    }
}

fn name16(name: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

fn section(
    sectname: &str,
    addr: u64,
    size: u64,
    offset: u32,
    reloff: u32,
    nreloc: u32,
    flags: u32,
) -> Section64<LittleEndian> {
    Section64 {
        sectname: name16(sectname),
        segname: name16(if flags == S_ZEROFILL { "__DATA" } else { "__TEXT" }),
        addr: U64::new(LE, addr),
        size: U64::new(LE, size),
        offset: U32::new(LE, offset),
        align: U32::new(LE, 2),
        reloff: U32::new(LE, reloff),
        nreloc: U32::new(LE, nreloc),
        flags: U32::new(LE, flags),
        reserved1: U32::new(LE, 0),
        reserved2: U32::new(LE, 0),
        reserved3: U32::new(LE, 0),
    }
}

/// A relocatable object with one segment holding an ordinary `__text` section and a
/// zero-fill `__bss` section, an `LC_VERSION_MIN_IPHONEOS`, an `LC_SYMTAB` and an
/// `LC_DATA_IN_CODE`, followed by the data those commands point at.
pub fn object_file(fixture: Fixture) -> Vec<u8> {
    let mut out = encode(&MachHeader64::<LittleEndian> {
        magic: U32::new(BigEndian, MH_CIGAM_64),
        cputype: U32::new(LE, fixture.cputype),
        cpusubtype: U32::new(LE, 0),
        filetype: U32::new(LE, MH_OBJECT),
        ncmds: U32::new(LE, 4),
        sizeofcmds: U32::new(LE, SIZEOFCMDS),
        flags: U32::new(LE, 0),
        reserved: U32::new(LE, 0),
    });

    let sections = [
        section(
            "__text",
            0,
            TEXT_SIZE as u64,
            TEXT_OFFSET,
            RELOC_OFFSET,
            1,
            S_REGULAR | S_ATTR_PURE_INSTRUCTIONS,
        ),
        section("__bss", TEXT_SIZE as u64, 64, 0, 0, 0, S_ZEROFILL),
    ];
    let segment = SegmentCommand64 {
        cmd: U32::new(LE, LC_SEGMENT_64),
        cmdsize: U32::new(LE, 232),
        segname: [0; 16],
        vmaddr: U64::new(LE, 0),
        vmsize: U64::new(LE, TEXT_SIZE as u64 + 64),
        fileoff: U64::new(LE, u64::from(TEXT_OFFSET)),
        filesize: U64::new(LE, TEXT_SIZE as u64),
        maxprot: U32::new(LE, 7),
        initprot: U32::new(LE, 7),
        nsects: U32::new(LE, 2),
        flags: U32::new(LE, 0),
    };
    out.extend(encode_segment(&segment, &sections));

    out.extend(encode(&VersionMinCommand::<LittleEndian> {
        cmd: U32::new(LE, LC_VERSION_MIN_IPHONEOS),
        cmdsize: U32::new(LE, 16),
        version: U32::new(LE, u32::from(fixture.minos) << 16),
        sdk: U32::new(LE, u32::from(fixture.sdk) << 16),
    }));
    out.extend(encode(&SymtabCommand::<LittleEndian> {
        cmd: U32::new(LE, LC_SYMTAB),
        cmdsize: U32::new(LE, 24),
        symoff: U32::new(LE, SYMBOL_OFFSET),
        nsyms: U32::new(LE, 1),
        stroff: U32::new(LE, STRING_OFFSET),
        strsize: U32::new(LE, 16),
    }));
    out.extend(encode(&LinkeditDataCommand::<LittleEndian> {
        cmd: U32::new(LE, LC_DATA_IN_CODE),
        cmdsize: U32::new(LE, 16),
        dataoff: U32::new(LE, DATA_IN_CODE_OFFSET),
        datasize: U32::new(LE, 8),
    }));
    assert_eq!(out.len(), TEXT_OFFSET as usize);

    out.extend([fixture.payload; TEXT_SIZE]);
    // relocation_info
    out.extend([4, 0, 0, 0, 1, 0, 0, 0x2d]);
    // data_in_code_entry
    out.extend([0, 0, 0, 0, 4, 0, 1, 0]);
    // nlist_64 for `_main`
    out.extend([1, 0, 0, 0, 0x0f, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    out.extend(b"\0_main\0\0\0\0\0\0\0\0\0\0");
    assert_eq!(out.len(), FILE_SIZE);
    out
}

/// A trivial archive format: the `ar` magic line, then `name\nlen\n<bytes>` per member.
/// Removing a name drops its first occurrence, like `ar d`.
pub struct FileArchiver;

const MAGIC: &[u8] = b"!<arch>\n";

pub fn archive_bytes(members: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    for (name, data) in members {
        out.extend(format!("{}\n{}\n", name, data.len()).as_bytes());
        out.extend(data);
    }
    out
}

pub fn parse_archive(data: &[u8]) -> Vec<(String, Vec<u8>)> {
    assert!(data.starts_with(MAGIC));
    let mut rest = &data[MAGIC.len()..];
    let mut members = Vec::new();
    while !rest.is_empty() {
        let name = take_line(&mut rest);
        let len: usize = take_line(&mut rest).parse().unwrap();
        members.push((name, rest[..len].to_vec()));
        rest = &rest[len..];
    }
    members
}

pub fn write_archive(path: &Path, members: &[(String, Vec<u8>)]) {
    fs::write(path, archive_bytes(members)).unwrap();
}

pub fn read_archive(path: &Path) -> Vec<(String, Vec<u8>)> {
    parse_archive(&fs::read(path).unwrap())
}

fn take_line(rest: &mut &[u8]) -> String {
    let end = rest.iter().position(|&b| b == b'\n').unwrap();
    let text = String::from_utf8(rest[..end].to_vec()).unwrap();
    *rest = &rest[end + 1..];
    text
}

impl Archiver for FileArchiver {
    fn list(&self, archive: &Path) -> Result<Vec<String>> {
        Ok(read_archive(archive).into_iter().map(|(name, _)| name).collect())
    }

    fn extract_one(&self, archive: &Path, name: &str) -> Result<Vec<u8>> {
        read_archive(archive)
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data)
            .ok_or_else(|| Error::MemberNotFound {
                name: name.to_string(),
            })
    }

    fn remove(&self, archive: &Path, names: &[String]) -> Result<()> {
        let mut members = read_archive(archive);
        for name in names {
            if let Some(index) = members.iter().position(|(n, _)| n == name) {
                members.remove(index);
            }
        }
        write_archive(archive, &members);
        Ok(())
    }

    fn insert(&self, archive: &Path, paths: &[PathBuf]) -> Result<()> {
        let mut members = read_archive(archive);
        for path in paths {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            members.push((name, fs::read(path)?));
        }
        write_archive(archive, &members);
        Ok(())
    }
}
