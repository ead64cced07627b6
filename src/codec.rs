//! Fixed-layout structure codec.
//!
//! Mach-O structures are read and written through `object`'s `Pod` definitions in
//! little-endian byte order, the native encoding for arm64. The crate enables `object`'s
//! `unaligned` feature so structures can be decoded at any byte offset of a file buffer.

use std::mem;

use object::macho::{
    BuildVersionCommand, LoadCommand, Section64, SegmentCommand64, VersionMinCommand,
};
use object::pod::{self, Pod};
use object::LittleEndian;

use crate::error::{Error, Result};

/// Byte order of every arm64 Mach-O structure.
pub const LE: LittleEndian = LittleEndian;

/// Size of the generic `{cmd, cmdsize}` prefix shared by all load commands.
pub const COMMAND_PREFIX_SIZE: usize = mem::size_of::<LoadCommand<LittleEndian>>();

/// Growth of the load-command region when one `LC_VERSION_MIN_*` command is replaced by an
/// `LC_BUILD_VERSION` command with no tool entries.
///
/// Every file offset past the load commands moves by exactly this amount. The value is only
/// meaningful while a file undergoes a single such replacement.
pub const SIZE_DELTA: u32 = (mem::size_of::<BuildVersionCommand<LittleEndian>>()
    - mem::size_of::<VersionMinCommand<LittleEndian>>()) as u32;

/// Decodes a `T` starting at `offset`.
pub fn decode<T: Pod>(data: &[u8], offset: usize) -> Result<T> {
    let needed = mem::size_of::<T>();
    let available = data.len().saturating_sub(offset);
    let truncated = || Error::TruncatedInput {
        what: short_type_name::<T>(),
        offset,
        needed,
        available,
    };
    let tail = data.get(offset..).ok_or_else(truncated)?;
    let (value, _) = pod::from_bytes::<T>(tail).map_err(|()| truncated())?;
    Ok(*value)
}

/// Encodes `value` into exactly `size_of::<T>()` bytes.
pub fn encode<T: Pod>(value: &T) -> Vec<u8> {
    pod::bytes_of(value).to_vec()
}

/// Reads the `(cmd, cmdsize)` prefix of the command at `offset` without consuming it.
pub fn peek_command(data: &[u8], offset: usize) -> Result<(u32, u32)> {
    let prefix: LoadCommand<LittleEndian> = decode(data, offset)?;
    Ok((prefix.cmd.get(LE), prefix.cmdsize.get(LE)))
}

/// Decodes an `LC_SEGMENT_64` command and the section table that follows it.
///
/// The section table must lie entirely within `raw`, which holds exactly the command's
/// declared `cmdsize` bytes.
pub fn decode_segment(
    raw: &[u8],
) -> Result<(SegmentCommand64<LittleEndian>, Vec<Section64<LittleEndian>>)> {
    let segment: SegmentCommand64<LittleEndian> = decode(raw, 0)?;
    let nsects = segment.nsects.get(LE) as usize;
    let mut offset = mem::size_of::<SegmentCommand64<LittleEndian>>();
    let section_size = mem::size_of::<Section64<LittleEndian>>();
    // `nsects` is untrusted; check it against the command bytes before allocating.
    let needed = nsects.saturating_mul(section_size).saturating_add(offset);
    if needed > raw.len() {
        return Err(Error::TruncatedInput {
            what: "section headers",
            offset,
            needed: needed - offset,
            available: raw.len() - offset,
        });
    }
    let mut sections = Vec::with_capacity(nsects);
    for _ in 0..nsects {
        sections.push(decode::<Section64<LittleEndian>>(raw, offset)?);
        offset += section_size;
    }
    Ok((segment, sections))
}

/// Encodes a segment command followed by its sections.
pub fn encode_segment(
    segment: &SegmentCommand64<LittleEndian>,
    sections: &[Section64<LittleEndian>],
) -> Vec<u8> {
    let mut out = encode(segment);
    for section in sections {
        out.extend_from_slice(pod::bytes_of(section));
    }
    out
}

/// Reads a fixed-size, NUL-padded name field such as `segname`.
pub fn fixed_name(name: &[u8; 16]) -> String {
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    String::from_utf8_lossy(&name[..end]).into_owned()
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
