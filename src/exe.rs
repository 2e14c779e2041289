//! Reading and writing the fixed-length header of 16-bit DOS MZ executables.

use std::fmt;
use std::io::{self, prelude::*};

use thiserror::Error;

/// The EXE signature, as it appears in the first two bytes of the file.
pub const MAGIC: [u8; 2] = *b"MZ";

/// The length of an EXE header, excluding relocations and variable-sized
/// padding.
pub const HEADER_LEN: usize = 28;

/// An error in the layout of an EXE header, or a value that cannot be
/// represented in one.
#[derive(Debug, PartialEq, Error)]
pub enum FormatError {
    /// Fewer than `HEADER_LEN` bytes were available.
    #[error("EXE header of {len} bytes is too short; need 28 bytes")]
    MalformedHeader { len: usize },
    /// The EXE is too long for `e_cp` and `e_cblp`.
    #[error("EXE size of {len} bytes is too large to represent")]
    TooLong { len: usize },
    /// More relocations than fit in `e_crlc`.
    #[error("{num} relocations are too many to fit in 16 bits")]
    TooManyRelocations { num: usize },
    /// The header is too long for `e_cparhdr`.
    #[error("EXE header size of {len} bytes is too large to represent")]
    HeaderTooLong { len: usize },
}

/// A DOS EXE header. See <http://www.delorie.com/djgpp/doc/exe/>.
/// The field names are taken from `IMAGE_DOS_HEADER` from \<winnt.h\>.
///
/// Unlike the other fields, `e_magic` is kept as raw bytes, so that a header
/// with an unusual signature (e.g. `b"ZM"`) survives a round trip unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExeHeader {
    pub e_magic: [u8; 2],
    pub e_cblp: u16,
    pub e_cp: u16,
    pub e_crlc: u16,
    pub e_cparhdr: u16,
    pub e_minalloc: u16,
    pub e_maxalloc: u16,
    pub e_ss: u16,
    pub e_sp: u16,
    pub e_csum: u16,
    pub e_ip: u16,
    pub e_cs: u16,
    pub e_lfarlc: u16,
    pub e_ovno: u16,
}

fn fetch_u16le(buf: &[u8], i: usize) -> u16 {
    u16::from_le_bytes([buf[i], buf[i + 1]])
}

fn store_u16le(buf: &mut [u8], i: usize, v: u16) {
    buf[i..i + 2].copy_from_slice(&v.to_le_bytes());
}

impl ExeHeader {
    /// Parses the fixed fields of an EXE header from the start of `buf`. Bytes
    /// past the first `HEADER_LEN` are ignored.
    pub fn parse(buf: &[u8]) -> Result<Self, FormatError> {
        if buf.len() < HEADER_LEN {
            return Err(FormatError::MalformedHeader { len: buf.len() });
        }
        Ok(Self {
            e_magic: [buf[0], buf[1]],
            e_cblp: fetch_u16le(buf, 2),
            e_cp: fetch_u16le(buf, 4),
            e_crlc: fetch_u16le(buf, 6),
            e_cparhdr: fetch_u16le(buf, 8),
            e_minalloc: fetch_u16le(buf, 10),
            e_maxalloc: fetch_u16le(buf, 12),
            e_ss: fetch_u16le(buf, 14),
            e_sp: fetch_u16le(buf, 16),
            e_csum: fetch_u16le(buf, 18),
            e_ip: fetch_u16le(buf, 20),
            e_cs: fetch_u16le(buf, 22),
            e_lfarlc: fetch_u16le(buf, 24),
            e_ovno: fetch_u16le(buf, 26),
        })
    }

    /// Encodes the header into its `HEADER_LEN`-byte on-disk form.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0; HEADER_LEN];
        buf[0..2].copy_from_slice(&self.e_magic);
        store_u16le(&mut buf, 2, self.e_cblp);
        store_u16le(&mut buf, 4, self.e_cp);
        store_u16le(&mut buf, 6, self.e_crlc);
        store_u16le(&mut buf, 8, self.e_cparhdr);
        store_u16le(&mut buf, 10, self.e_minalloc);
        store_u16le(&mut buf, 12, self.e_maxalloc);
        store_u16le(&mut buf, 14, self.e_ss);
        store_u16le(&mut buf, 16, self.e_sp);
        store_u16le(&mut buf, 18, self.e_csum);
        store_u16le(&mut buf, 20, self.e_ip);
        store_u16le(&mut buf, 22, self.e_cs);
        store_u16le(&mut buf, 24, self.e_lfarlc);
        store_u16le(&mut buf, 26, self.e_ovno);
        buf
    }

    /// Serializes the header to `w`. Returns the number of bytes written.
    pub fn write<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<usize> {
        let buf = self.to_bytes();
        w.write_all(&buf).and(Ok(buf.len()))
    }

    /// The length of the header including relocations and padding, as stated
    /// by `e_cparhdr`.
    pub fn header_len(&self) -> usize {
        usize::from(self.e_cparhdr) * 16
    }
}

impl fmt::Display for ExeHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "e_magic    {:?}", String::from_utf8_lossy(&self.e_magic))?;
        for (name, value) in &[
            ("e_cblp", self.e_cblp),
            ("e_cp", self.e_cp),
            ("e_crlc", self.e_crlc),
            ("e_cparhdr", self.e_cparhdr),
            ("e_minalloc", self.e_minalloc),
            ("e_maxalloc", self.e_maxalloc),
            ("e_ss", self.e_ss),
            ("e_sp", self.e_sp),
            ("e_csum", self.e_csum),
            ("e_ip", self.e_ip),
            ("e_cs", self.e_cs),
            ("e_lfarlc", self.e_lfarlc),
        ] {
            writeln!(f, "{:<10} {:#06x}", name, value)?;
        }
        write!(f, "{:<10} {:#06x}", "e_ovno", self.e_ovno)
    }
}

/// Returns a tuple `(e_cblp, e_cp)` that encodes `len` as appropriate for the
/// so-named EXE header fields. Returns `None` if the `len` is too large to be
/// represented (> 0x1fffe00).
pub fn encode_exe_len(len: usize) -> Option<(u16, u16)> {
    // Number of 512-byte blocks needed to store len, rounded up.
    let e_cp: u16 = ((len + 511) / 512).try_into().ok()?;
    // Number of bytes remaining after all the full blocks.
    let e_cblp: u16 = (len % 512).try_into().ok()?;
    Some((e_cblp, e_cp))
}
