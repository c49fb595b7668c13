//! OS collaborators: the load primitive, error-code decoding and the search
//! environment.
//!
//! One implementation per target family lives in `unix` and `win`; both
//! export `NativeHost`, `OsErrorDecoder` and `OsEnvironment`.

use std::path::Path;

use crate::error::LoadError;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{NativeHost, OsEnvironment, OsErrorDecoder};

#[cfg(windows)]
mod win;
#[cfg(windows)]
pub use win::{NativeHost, OsEnvironment, OsErrorDecoder};

/// Error code the load primitive reports when a module, or one of its
/// dependencies, cannot be found.
#[cfg(windows)]
pub const NOT_FOUND: u32 = 126; // ERROR_MOD_NOT_FOUND

/// Error code the load primitive reports when a module, or one of its
/// dependencies, cannot be found.
#[cfg(unix)]
pub const NOT_FOUND: u32 = libc::ENOENT as u32;

/// Placeholder returned for codes the OS has no message for.
pub const UNKNOWN_MESSAGE: &str = "?";

/// Process-level dynamic library loader.
pub trait LibraryHost {
    /// Whether a module with this file name is already mapped in-process.
    fn is_loaded(&self, name: &str) -> bool;

    /// Load a module by bare file name, using the configured search order.
    fn load(&mut self, name: &str) -> Result<(), LoadError>;

    /// Add `dir` to the directories consulted for later loads, including the
    /// import resolution of modules loaded from it.
    fn set_search_directory(&mut self, dir: &Path);
}

/// Maps OS error codes to human-readable messages.
pub trait ErrorDecoder {
    /// Message for `code`, with `args` substituted into inserts where the OS
    /// supports them. Returns [`UNKNOWN_MESSAGE`] for unrecognized codes.
    fn decode(&self, code: u32, args: &[&str]) -> String;
}
