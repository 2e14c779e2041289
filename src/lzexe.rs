//! Decompressor for DOS executables compressed with LZEXE 0.91.
//!
//! An LZEXE-compressed EXE has this layout, after the EXE header:
//!
//! * the compressed program image, from the start of the body up to `cs:0000`;
//! * the loader, starting at `cs:0000`. It begins with the program's original
//!   `ip`, `cs`, `sp`, and `ss`, followed by the decompression code;
//! * the packed relocation table, 0x158 bytes past `cs:0000`.
//!
//! The compressed image is an LZ77 stream in which single control bits select
//! between literal bytes, short copies (distance up to 256, length 2 to 5), and
//! long copies (distance up to 8192, length 3 to 256). The relocation table is
//! a list of differences between successive linear addresses.
//!
//! # Decompression
//!
//! The `unpack` function takes the bytes of a compressed EXE and returns the
//! bytes of an uncompressed EXE. `unpack_parts` does the same but returns the
//! pieces separately.
//!
//! # Inconsistencies
//!
//! The output matches what the classic UNLZEXE tools produce, including their
//! quirks:
//!
//! * `e_cp` and `e_cblp` count only the decompressed program image, not the
//!   header and relocation table in front of it.
//! * The header is not padded out to `e_cparhdr` paragraphs; the relocation
//!   table and program image follow it immediately.
//! * Copy commands that reach back before the start of the output are an error
//!   here, rather than reading garbage.

use std::io::{self, Write};

use thiserror::Error;

use crate::bits::{BitReader, ByteReader};
use crate::exe::{self, ExeHeader};
use crate::pointer::Pointer;

/// The signature that LZEXE 0.91 writes just after the fixed EXE header fields.
pub const SIGNATURE: [u8; 4] = *b"LZ91";

/// Offset of the packed relocation table from the start of the loader.
const RELOCS_OFFSET: usize = 0x158;

/// Length of the saved register block at the start of the loader.
const REGISTERS_LEN: usize = 8;

/// An LZEXE format error.
#[derive(Debug, PartialEq, Error)]
pub enum FormatError {
    /// The fixed EXE header is unreadable, or a reconstructed value does not
    /// fit in its header field.
    #[error(transparent)]
    Exe(#[from] exe::FormatError),
    /// A region whose location is given by the EXE header lies past the end of
    /// the input.
    #[error("{region} at offset {offset} lies past the end of the {input_len}-byte input")]
    MalformedHeader { region: &'static str, offset: usize, input_len: usize },
    /// A decoder ran out of input before seeing its termination code. `offset`
    /// is relative to the start of the compressed data or relocation table.
    #[error("read overflow: reached the end of the stream at offset {offset} before seeing a termination code")]
    TruncatedStream { offset: usize },
    /// A copy command would read from before the beginning of the output.
    #[error("copy overflow: copy {length} bytes from distance {distance} at index {dst}")]
    CopyOverflow { dst: usize, distance: i16, length: usize },
    /// A relocation address exceeded 20 bits.
    #[error("relocation address {address:#x} is too large to represent")]
    RelocationTooLarge { address: u64 },
}

/// The register values the loader hands to the decompressed program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub ip: u16,
    pub cs: u16,
    pub sp: u16,
    pub ss: u16,
}

impl Registers {
    /// Parses the 8-byte register block from the start of the loader.
    fn parse(buf: &[u8; REGISTERS_LEN]) -> Self {
        Self {
            ip: u16::from_le_bytes([buf[0], buf[1]]),
            cs: u16::from_le_bytes([buf[2], buf[3]]),
            sp: u16::from_le_bytes([buf[4], buf[5]]),
            ss: u16::from_le_bytes([buf[6], buf[7]]),
        }
    }
}

/// Appends `length` bytes to `output`, copied from `distance` bytes before the
/// end. `distance` is negative. When the length exceeds the distance, the
/// source overlaps the bytes being written, and the copy repeats a pattern.
fn copy_within_output(output: &mut Vec<u8>, distance: i16, length: usize) -> Result<(), FormatError> {
    let back = usize::from(distance.unsigned_abs());
    output.len().checked_sub(back)
        .ok_or(FormatError::CopyOverflow { dst: output.len(), distance, length })?;
    let mut remaining = length;
    while remaining > 0 {
        // At most `back` bytes are available to copy from before reaching the
        // write position.
        let start = output.len() - back;
        let n = remaining.min(back);
        output.extend_from_within(start..start + n);
        remaining -= n;
    }
    Ok(())
}

/// The basic decompression loop. Reads the compressed program image from
/// `input` and returns the decompressed image.
///
/// Each command starts with control bits:
///
/// * `1`: copy one literal byte.
/// * `0 1`: long copy. Two bytes `lo`, `hi` encode a 13-bit distance
///   (`hi[7:3]:lo`) and a length `hi[2:0] + 2`. If `hi[2:0]` is 0, a third byte
///   holds the length minus 1; the values 0 and 1 instead mean end of data and
///   segment change.
/// * `0 0 b1 b0`: short copy of length `b1b0 + 2`, with the distance in the
///   following byte.
pub fn decompress(input: &[u8]) -> Result<Vec<u8>, FormatError> {
    let mut bits = BitReader::new(input)?;
    let mut output = Vec::new();
    loop {
        if bits.next_bit()? == 1 {
            output.push(bits.next_byte()?);
            continue;
        }

        let (distance, length) = if bits.next_bit()? == 1 {
            let lo = bits.next_byte()?;
            let hi = bits.next_byte()?;
            let distance = (0xe000 | ((u16::from(hi) << 5) & 0xff00) | u16::from(lo)) as i16;
            match hi & 0x07 {
                0 => match bits.next_byte()? {
                    0 => break,
                    1 => {
                        // The loader normalizes its segment registers here;
                        // there's nothing to do in a flat buffer.
                        debug!("segment change at output index {}", output.len());
                        continue;
                    }
                    n => (distance, usize::from(n) + 1),
                },
                n => (distance, usize::from(n) + 2),
            }
        } else {
            let b1 = bits.next_bit()?;
            let b0 = bits.next_bit()?;
            let length = usize::from((b1 << 1) | b0) + 2;
            let distance = (0xff00 | u16::from(bits.next_byte()?)) as i16;
            (distance, length)
        };
        copy_within_output(&mut output, distance, length)?;
    }
    debug!("decompressed {} bytes from {} of {} compressed bytes", output.len(), bits.position(), input.len());
    Ok(output)
}

/// Parses a packed LZEXE relocation table.
///
/// Each entry is the difference from the previous linear address (starting at
/// 0): a single nonzero byte, or a zero byte followed by a 16-bit difference.
/// A 16-bit difference of 0 advances by 0xfff without producing an entry, and
/// a 16-bit difference of 1 ends the table.
pub fn decode_relocs(input: &[u8]) -> Result<Vec<Pointer>, FormatError> {
    let mut bytes = ByteReader::new(input);
    let mut relocs = Vec::new();
    let mut address: u64 = 0;
    loop {
        let delta = match bytes.next_byte()? {
            0 => match bytes.next_u16le()? {
                0 => {
                    address += 0xfff;
                    continue;
                }
                1 => break,
                total => total,
            },
            n => u16::from(n),
        };
        address += u64::from(delta);
        let pointer = u32::try_from(address).ok()
            .and_then(Pointer::from_abs)
            .ok_or(FormatError::RelocationTooLarge { address })?;
        debug!("relocation {}", pointer);
        relocs.push(pointer);
    }
    debug!("{} relocations in {} bytes", relocs.len(), bytes.position());
    Ok(relocs)
}

/// Encodes relocations as an EXE relocation table, 4 bytes per entry.
pub fn encode_relocs(relocs: &[Pointer]) -> Vec<u8> {
    relocs.iter().flat_map(Pointer::to_le_bytes).collect()
}

/// Computes the header of the uncompressed EXE.
///
/// `code_len` is the length of the decompressed program image and
/// `relocs_len` the length in bytes of the EXE relocation table that will
/// follow the header. The allocation fields come from `original`; the entry
/// point and stack come from `registers`.
pub fn build_header(original: &ExeHeader, code_len: usize, relocs_len: usize, registers: &Registers)
-> Result<ExeHeader, FormatError> {
    let (e_cblp, e_cp) = exe::encode_exe_len(code_len)
        .ok_or(exe::FormatError::TooLong { len: code_len })?;
    let num_relocs = relocs_len / 4;
    let e_crlc = u16::try_from(num_relocs)
        .or(Err(exe::FormatError::TooManyRelocations { num: num_relocs }))?;
    let header_len = exe::HEADER_LEN + relocs_len;
    let e_cparhdr = u16::try_from((header_len + 15) / 16)
        .or(Err(exe::FormatError::HeaderTooLong { len: header_len }))?;
    Ok(ExeHeader {
        e_magic: exe::MAGIC,
        e_cblp,
        e_cp,
        e_crlc,
        e_cparhdr,
        e_minalloc: original.e_minalloc,
        e_maxalloc: original.e_maxalloc,
        e_ss: registers.ss,
        e_sp: registers.sp,
        e_csum: 0,
        e_ip: registers.ip,
        e_cs: registers.cs,
        e_lfarlc: exe::HEADER_LEN as u16,
        e_ovno: 0,
    })
}

/// Returns true if `input` carries the LZEXE 0.91 signature after its EXE
/// header fields.
pub fn has_signature(input: &[u8]) -> bool {
    input.get(exe::HEADER_LEN..exe::HEADER_LEN + SIGNATURE.len()) == Some(&SIGNATURE[..])
}

/// A decompressed EXE, in pieces.
#[derive(Debug)]
pub struct Unpacked {
    pub header: ExeHeader,
    pub relocs: Vec<Pointer>,
    pub body: Vec<u8>,
}

impl Unpacked {
    /// Returns the serialized EXE: the header, the relocation table, then the
    /// program image.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(exe::HEADER_LEN + 4 * self.relocs.len() + self.body.len());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend(encode_relocs(&self.relocs));
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Serializes the EXE to `w`. Returns the number of bytes written.
    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<u64> {
        let mut n = self.header.write(w)
            .map_err(|err| annotate_io_error(err, "writing EXE header"))? as u64;
        let relocs = encode_relocs(&self.relocs);
        w.write_all(&relocs)
            .map_err(|err| annotate_io_error(err, "writing EXE relocations"))?;
        n += relocs.len() as u64;
        w.write_all(&self.body)
            .map_err(|err| annotate_io_error(err, "writing EXE body"))?;
        n += self.body.len() as u64;
        Ok(n)
    }
}

/// Adds a prefix to the message of an `io::Error`.
fn annotate_io_error(err: io::Error, msg: &str) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {}", msg, err))
}

/// Decompresses an LZEXE-compressed EXE and returns the header, relocations,
/// and program image of the uncompressed EXE.
pub fn unpack_parts(input: &[u8]) -> Result<Unpacked, FormatError> {
    let original = ExeHeader::parse(input)?;
    debug!("{:?}", original);

    // The body starts after e_cparhdr paragraphs of header.
    let body_offset = original.header_len();
    let body = input.get(body_offset..)
        .ok_or(FormatError::MalformedHeader { region: "EXE body", offset: body_offset, input_len: input.len() })?;

    // The loader starts at cs:0000 and begins with the saved registers.
    let loader_offset = usize::from(original.e_cs) * 16;
    let registers = body.get(loader_offset..loader_offset + REGISTERS_LEN)
        .and_then(|buf| <&[u8; REGISTERS_LEN]>::try_from(buf).ok())
        .map(Registers::parse)
        .ok_or(FormatError::MalformedHeader {
            region: "loader",
            offset: body_offset + loader_offset,
            input_len: input.len(),
        })?;
    debug!("loader at 0x{:x}: {:?}", body_offset + loader_offset, registers);

    // Everything before the loader is compressed program image.
    let body = decompress(&body[..loader_offset])?;

    // A relocation table past the end of the input decodes as empty, which is
    // reported as truncated.
    let relocs = decode_relocs(tail(input, body_offset + loader_offset + RELOCS_OFFSET))?;

    let header = build_header(&original, body.len(), 4 * relocs.len(), &registers)?;
    debug!("{:?}", header);

    Ok(Unpacked { header, relocs, body })
}

/// Returns `input[offset..]`, or an empty slice if `offset` is past the end.
fn tail(input: &[u8], offset: usize) -> &[u8] {
    input.get(offset..).unwrap_or(&[])
}

/// Decompresses an LZEXE-compressed EXE and returns the bytes of the
/// uncompressed EXE.
pub fn unpack(input: &[u8]) -> Result<Vec<u8>, FormatError> {
    unpack_parts(input).map(|unpacked| unpacked.to_bytes())
}
