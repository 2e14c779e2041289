//! Builders for synthetic LZEXE-compressed EXEs.

#![allow(dead_code)]

use std::env;
use std::fs;
use std::path;

use unlzexe::exe;
use unlzexe::lzexe;
use unlzexe::Pointer;

/// One command in an LZEXE compressed stream.
#[derive(Debug, Clone, Copy)]
pub enum Token {
    Literal(u8),
    /// Copy `length` bytes from `distance` (negative) bytes back.
    Copy { distance: i16, length: usize },
    /// Copy with the extended length byte even when the length would fit in
    /// the short form.
    LongCopy { distance: i16, length: usize },
    SegmentChange,
    End,
}

/// Writes control bits and raw bytes in the order the decompressor reads
/// them: a new 16-bit control word is reserved in the output as soon as the
/// previous one fills.
pub struct Encoder {
    out: Vec<u8>,
    word_pos: usize,
    nbits: u32,
}

impl Encoder {
    pub fn new() -> Self {
        Self { out: vec![0, 0], word_pos: 0, nbits: 0 }
    }

    fn put_bit(&mut self, bit: u16) {
        let word = u16::from_le_bytes([self.out[self.word_pos], self.out[self.word_pos + 1]]) | (bit << self.nbits);
        self.out[self.word_pos..self.word_pos + 2].copy_from_slice(&word.to_le_bytes());
        self.nbits += 1;
        if self.nbits == 16 {
            self.word_pos = self.out.len();
            self.out.extend_from_slice(&[0, 0]);
            self.nbits = 0;
        }
    }

    fn put_byte(&mut self, byte: u8) {
        self.out.push(byte);
    }

    fn put_long(&mut self, distance: i16, count_bits: u8) {
        let d = distance as u16;
        assert!(distance < 0 && d >= 0xe000, "distance {} out of range", distance);
        self.put_bit(0);
        self.put_bit(1);
        self.put_byte(d as u8);
        self.put_byte((((d >> 8) & 0x1f) << 3) as u8 | count_bits);
    }

    pub fn put(&mut self, token: Token) {
        match token {
            Token::Literal(b) => {
                self.put_bit(1);
                self.put_byte(b);
            }
            Token::Copy { distance, length } if (2..=5).contains(&length) && distance >= -256 => {
                assert!(distance < 0);
                let n = (length - 2) as u16;
                self.put_bit(0);
                self.put_bit(0);
                self.put_bit(n >> 1);
                self.put_bit(n & 1);
                self.put_byte(distance as u8);
            }
            Token::Copy { distance, length } if (3..=9).contains(&length) => {
                self.put_long(distance, (length - 2) as u8);
            }
            Token::Copy { distance, length } | Token::LongCopy { distance, length } => {
                assert!((3..=256).contains(&length), "length {} out of range", length);
                self.put_long(distance, 0);
                self.put_byte((length - 1) as u8);
            }
            Token::SegmentChange => {
                self.put_long(-1, 0);
                self.put_byte(1);
            }
            Token::End => {
                self.put_long(-1, 0);
                self.put_byte(0);
            }
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }
}

/// Encodes a token stream, appending the end code.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let mut enc = Encoder::new();
    for &token in tokens {
        enc.put(token);
    }
    enc.put(Token::End);
    enc.finish()
}

/// A greedy compressor, enough to produce realistic streams that use all the
/// command forms.
pub fn compress(input: &[u8]) -> Vec<u8> {
    const WINDOW: usize = 0x2000;
    const MAX_LEN: usize = 256;
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < input.len() {
        let mut best = (0, 0);
        // Search nearest first, so ties go to the shortest distance.
        for start in (i.saturating_sub(WINDOW)..i).rev() {
            let mut len = 0;
            while len < MAX_LEN && i + len < input.len() && input[start + len] == input[i + len] {
                len += 1;
            }
            if len > best.1 {
                best = (i - start, len);
                if len == MAX_LEN {
                    break;
                }
            }
        }
        let (back, len) = best;
        if len >= 3 || (len == 2 && back <= 256) {
            tokens.push(Token::Copy { distance: -(back as i32) as i16, length: len });
            i += len;
        } else {
            tokens.push(Token::Literal(input[i]));
            i += 1;
        }
    }
    encode(&tokens)
}

/// Encodes relocations as an LZEXE packed relocation table. The relocations
/// must be in strictly increasing order of address.
pub fn pack_relocs(relocs: &[Pointer]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut prev = 0;
    for pointer in relocs {
        let mut delta = pointer.abs() - prev;
        assert!(delta > 0, "relocations not in increasing order");
        while delta > 0xffff {
            buf.extend_from_slice(&[0x00, 0x00, 0x00]);
            delta -= 0xfff;
        }
        if delta < 0x100 {
            buf.push(delta as u8);
        } else {
            buf.push(0x00);
            buf.extend_from_slice(&(delta as u16).to_le_bytes());
        }
        prev = pointer.abs();
    }
    buf.extend_from_slice(&[0x00, 0x01, 0x00]);
    buf
}

/// Register values used by `make_image` unless overridden.
pub const REGISTERS: lzexe::Registers = lzexe::Registers { ip: 0x0010, cs: 0x0000, sp: 0x0200, ss: 0x0040 };

/// Offset of the packed relocation table in the loader.
pub const RELOCS_OFFSET: usize = 0x158;

/// Builds a compressed EXE from an already compressed stream and an already
/// packed relocation table. The compressed stream is padded to a paragraph
/// boundary and followed by the loader: the saved registers, filler up to the
/// relocation table, and the table.
pub fn make_image_raw(compressed: &[u8], packed_relocs: &[u8], registers: &lzexe::Registers) -> Vec<u8> {
    let mut body = compressed.to_vec();
    body.resize((body.len() + 15) / 16 * 16, 0xff);
    let e_cs = (body.len() / 16) as u16;

    body.extend_from_slice(&registers.ip.to_le_bytes());
    body.extend_from_slice(&registers.cs.to_le_bytes());
    body.extend_from_slice(&registers.sp.to_le_bytes());
    body.extend_from_slice(&registers.ss.to_le_bytes());
    // Stand-in for the loader code.
    body.resize(usize::from(e_cs) * 16 + RELOCS_OFFSET, 0x90);
    body.extend_from_slice(packed_relocs);

    let header_len = 32;
    let (e_cblp, e_cp) = exe::encode_exe_len(header_len + body.len()).unwrap();
    let header = exe::ExeHeader {
        e_magic: exe::MAGIC,
        e_cblp,
        e_cp,
        e_crlc: 0,
        e_cparhdr: (header_len / 16) as u16,
        e_minalloc: 0x0100,
        e_maxalloc: 0xffff,
        e_ss: e_cs + 0x40,
        e_sp: 0x0080,
        e_csum: 0,
        e_ip: 0x000e,
        e_cs,
        e_lfarlc: 0x001c,
        e_ovno: 0,
    };
    let mut image = header.to_bytes().to_vec();
    image.extend_from_slice(&lzexe::SIGNATURE);
    image.extend_from_slice(&body);
    image
}

/// Builds a compressed EXE whose decompressed program image is `code`.
pub fn make_image(code: &[u8], relocs: &[Pointer]) -> Vec<u8> {
    make_image_raw(&compress(code), &pack_relocs(relocs), &REGISTERS)
}

/// Program bytes with some repetition, like real code.
pub fn sample_code(len: usize) -> Vec<u8> {
    let mut code = Vec::with_capacity(len);
    let mut x: u32 = 1;
    while code.len() < len {
        x = x.wrapping_mul(1103515245).wrapping_add(12345);
        match (x >> 16) % 4 {
            0 => code.extend_from_slice(b"\xb8\x00\x4c\xcd\x21"),
            1 => code.extend(std::iter::repeat(0x90).take(((x >> 8) % 40) as usize)),
            2 => code.extend_from_slice(b"Hello, world!$"),
            _ => code.push((x >> 24) as u8),
        }
    }
    code.truncate(len);
    code
}

// call save_image if the environment variable UNLZEXE_TEST_SAVE_EXE is set.
pub fn maybe_save_image<P: AsRef<path::Path>>(path: P, image: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
    if env::var_os("UNLZEXE_TEST_SAVE_EXE").is_some() {
        fs::write(path, image)?;
    }
    Ok(())
}
