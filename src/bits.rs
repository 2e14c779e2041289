//! Cursors for LZEXE compressed data.
//!
//! LZEXE interleaves two kinds of data in a single byte stream: 16-bit
//! little-endian words of control bits, consumed least-significant bit first,
//! and raw bytes (literals and copy parameters). A new control word is read
//! from the current position in the stream as soon as the previous one runs
//! out, so the words end up wherever the byte cursor happened to be at that
//! moment.

use crate::lzexe::FormatError;

/// A forward-only cursor over a byte slice. Running off the end is a
/// `TruncatedStream` error at the end offset, and a failed read consumes
/// nothing.
#[derive(Debug)]
pub struct ByteReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let buf = self.input.get(self.pos..self.pos + n)
            .ok_or(FormatError::TruncatedStream { offset: self.input.len() })?;
        self.pos += n;
        Ok(buf)
    }

    pub fn next_byte(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    /// Returns the next two bytes as a little-endian `u16`.
    pub fn next_u16le(&mut self) -> Result<u16, FormatError> {
        let buf = self.take(2)?;
        Ok(u16::from_le_bytes([buf[0], buf[1]]))
    }

    /// The number of bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }
}

#[derive(Debug)]
pub struct BitReader<'a> {
    bytes: ByteReader<'a>,
    /// Control bits not yet consumed, least-significant first.
    buffer: u16,
    /// Number of valid bits left in `buffer`. Zero only when a refill failed.
    remaining: u8,
}

impl<'a> BitReader<'a> {
    /// Creates a reader positioned at the start of `input` and loads the first
    /// control word.
    pub fn new(input: &'a [u8]) -> Result<Self, FormatError> {
        let mut reader = Self {
            bytes: ByteReader::new(input),
            buffer: 0,
            remaining: 0,
        };
        reader.refill()?;
        Ok(reader)
    }

    fn refill(&mut self) -> Result<(), FormatError> {
        self.buffer = self.bytes.next_u16le()?;
        self.remaining = 16;
        Ok(())
    }

    /// Returns the next control bit. The following control word is loaded
    /// eagerly, as soon as the last bit of the current one is taken.
    pub fn next_bit(&mut self) -> Result<u8, FormatError> {
        if self.remaining == 0 {
            // The eager refill after the previous bit failed; try again.
            self.refill()?;
        }
        let bit = (self.buffer & 1) as u8;
        self.buffer >>= 1;
        self.remaining -= 1;
        if self.remaining == 0 {
            self.refill()?;
        }
        Ok(bit)
    }

    /// Returns the next raw byte, independently of the control bits.
    pub fn next_byte(&mut self) -> Result<u8, FormatError> {
        self.bytes.next_byte()
    }

    /// Returns the next two raw bytes as a little-endian `u16`.
    pub fn next_u16le(&mut self) -> Result<u16, FormatError> {
        self.bytes.next_u16le()
    }

    /// The number of bytes consumed so far, control words included.
    pub fn position(&self) -> usize {
        self.bytes.position()
    }
}
