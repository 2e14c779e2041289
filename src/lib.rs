//! unlzexe decompresses DOS executables that were compressed with LZEXE 0.91.
//!
//! LZEXE turns an EXE into a small self-extracting one: the program image is
//! LZ77-compressed, the relocation table is delta-encoded, and a loader that
//! undoes both at run time is appended. This library undoes them ahead of time
//! and rebuilds an ordinary EXE.
//!
//! The library works on byte buffers and does no I/O of its own. See the
//! `lzexe` module for the format and for `unpack`, the main entry point, and
//! the `exe` module for the EXE header.
//!
//! # References
//!
//! * <http://www.delorie.com/djgpp/doc/exe/>
//! * <https://bellard.org/lzexe.html>

#[macro_use]
mod debug;
pub use debug::DEBUG;

pub mod bits;
pub mod exe;
pub mod lzexe;
pub mod pointer;

pub use lzexe::{unpack, FormatError};
pub use pointer::Pointer;
