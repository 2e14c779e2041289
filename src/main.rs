//! unlzexe decompresses DOS executables that were compressed with LZEXE 0.91.
//!
//! # Decompression
//!
//! ```sh
//! unlzexe input.exe unpacked.exe
//! ```
//!
//! # Header information
//!
//! ```sh
//! unlzexe -i input.exe
//! ```
//!
//! # Exit status
//!
//! Exit status is 0 if there was no error, or 1 if there was any kind of error
//! (usage error, I/O error, or LZEXE format error).

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic;

use unlzexe::exe;
use unlzexe::lzexe;

/// An error that may occur while decompressing an EXE file.
#[derive(Debug)]
enum Error {
    /// An I/O error.
    Io(io::Error),
    /// An EXE or LZEXE format error.
    Format(lzexe::FormatError),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => err.fmt(f),
            Error::Format(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<lzexe::FormatError> for Error {
    fn from(err: lzexe::FormatError) -> Self {
        Error::Format(err)
    }
}

impl From<exe::FormatError> for Error {
    fn from(err: exe::FormatError) -> Self {
        Error::Format(err.into())
    }
}

/// An `Error` annotated with a `Path`.
#[derive(Debug)]
struct PathError {
    path: PathBuf,
    err: Error,
}

impl PathError {
    fn new<P: AsRef<Path>>(path: P, err: Error) -> Self {
        Self { path: path.as_ref().to_owned(), err }
    }
}

impl std::error::Error for PathError {}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.err)
    }
}

/// Reads a whole file, warning if it doesn't look like LZEXE 0.91 output.
fn read_input<P: AsRef<Path>>(input_path: P) -> Result<Vec<u8>, PathError> {
    let input = fs::read(&input_path)
        .map_err(|err| PathError::new(&input_path, err.into()))?;
    if !lzexe::has_signature(&input) {
        eprintln!("{}: warning: no LZ91 signature; trying to decompress anyway",
            input_path.as_ref().display());
    }
    Ok(input)
}

/// Reads a compressed EXE from `input_path`, decompresses it, and writes the
/// uncompressed EXE to `output_path`.
fn process<P, Q>(input_path: P, output_path: Q) -> Result<(), PathError>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    // Any error while reading or decompressing gets annotated with input_path.
    let input = read_input(&input_path)?;
    let unpacked = lzexe::unpack_parts(&input)
        .map_err(|err| PathError::new(&input_path, err.into()))?;

    // Any error while saving gets annotated with output_path. Nothing is
    // created unless decompression succeeded.
    (|| -> Result<_, Error> {
        let output = fs::File::create(&output_path)?;
        let mut output = io::BufWriter::new(output);
        unpacked.write(&mut output)?;
        output.flush()?;
        Ok(())
    })()
        .map_err(|err| PathError::new(&output_path, err))?;

    Ok(())
}

/// Prints the EXE header of `input_path` to stdout.
fn info<P: AsRef<Path>>(input_path: P) -> Result<(), PathError> {
    let input = read_input(&input_path)?;
    let header = exe::ExeHeader::parse(&input)
        .map_err(|err| PathError::new(&input_path, err.into()))?;
    println!("{}", header);
    Ok(())
}

/// Prints a usage message to `w`.
fn print_usage<W: Write + ?Sized>(w: &mut W) -> io::Result<()> {
    let program = env::args_os().next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("unlzexe"));
    writeln!(w, "Usage: {} [OPTION]... INPUT.EXE OUTPUT.EXE", program.display())?;
    writeln!(w, "Decompress a DOS EXE executable compressed with LZEXE.")?;
    writeln!(w)?;
    writeln!(w, "Options:")?;
    writeln!(w, "    -i, --info          print the EXE header of INPUT.EXE and exit")?;
    writeln!(w, "        --debug         show debugging output")?;
    writeln!(w, "    -h, --help          show this help")
}

struct Options {
    help: bool,
    info: bool,
    debug: bool,
    free: Vec<OsString>,
}

fn parse_args() -> Result<Options, lexopt::Error> {
    use lexopt::prelude::*;

    let mut opts = Options {
        help: false,
        info: false,
        debug: false,
        free: Vec::new(),
    };
    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => opts.help = true,
            Short('i') | Long("info") => opts.info = true,
            Long("debug") => opts.debug = true,
            Value(value) => opts.free.push(value),
            _ => return Err(arg.unexpected()),
        }
    }
    Ok(opts)
}

fn main() {
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(1);
        }
    };

    if opts.help {
        print_usage(&mut io::stdout()).unwrap();
        return;
    }

    if opts.debug {
        unlzexe::DEBUG.store(true, atomic::Ordering::Relaxed);
    }

    let result = match (opts.info, opts.free.as_slice()) {
        (true, [input_path]) => info(input_path),
        (false, [input_path, output_path]) => process(input_path, output_path),
        (true, _) => {
            print_usage(&mut io::stderr()).unwrap();
            eprintln!("\nNeed an INPUT.EXE argument");
            process::exit(1);
        }
        (false, _) => {
            print_usage(&mut io::stderr()).unwrap();
            eprintln!("\nNeed INPUT.EXE and OUTPUT.EXE arguments");
            process::exit(1);
        }
    };

    if let Err(err) = result {
        eprintln!("{}", err);
        process::exit(1);
    }
}
