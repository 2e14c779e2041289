use std::sync::atomic;

/// If `DEBUG` is true, the decoders trace what they are doing to stderr. The
/// `--debug` option of the command-line program sets it.
pub static DEBUG: atomic::AtomicBool = atomic::AtomicBool::new(false);

macro_rules! debug {
    ($($x:tt)*) => {
        if crate::debug::DEBUG.load(::std::sync::atomic::Ordering::Relaxed) {
            eprintln!("debug: {}", format_args!($($x)*));
        }
    }
}
