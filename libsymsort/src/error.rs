pub(crate) use anyhow::Error;
use std::fmt::Display;

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// An error indicating that we attempted to initialise global state that can only be initialised
/// once.
#[derive(Debug, Clone, Copy)]
pub struct AlreadyInitialised;

/// Prints a warning to stderr. The report itself may be going to stdout, so we keep warnings out of
/// it.
pub(crate) fn warning(message: &str) {
    eprintln!("WARNING: symsort: {message}");
}

/// Prints an error, including its chain of causes, then exits.
pub fn report_error_and_exit(error: &Error) -> ! {
    eprintln!("symsort: error: {error:?}");
    std::process::exit(1);
}

impl Display for AlreadyInitialised {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Attempted to initialise global state more than once")
    }
}

impl core::error::Error for AlreadyInitialised {}
