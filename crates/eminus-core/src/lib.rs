//! Native plugin bootstrap for EMinus.
//!
//! Loads the shared libraries listed in `mods/eminus.ini` (or every library
//! in `mods/` when there is no manifest) into the running process, in
//! declaration order, and explains load failures.
//!
//! ## Components
//!
//! - **resolver**: loader-style search for a bare library name
//! - **manifest**: forgiving parser for the INI-like manifest
//! - **imports**: PE / ELF import-table reader
//! - **checker**: names the missing dependency behind a "not found" failure
//! - **platform**: load primitive, error decoding and search environment per OS
//! - **loader**: the bootstrap pass itself

pub mod checker;
pub mod config;
pub mod console;
pub mod error;
pub mod imports;
pub mod loader;
pub mod manifest;
pub mod platform;
pub mod resolver;

pub use checker::{DependencyChecker, DependencyReport, ImportTableChecker};
pub use config::BootstrapConfig;
pub use console::{Console, MemoryConsole, StdConsole, Stream};
pub use error::{BootstrapError, ImportError, LoadError, Result};
pub use loader::{
    BootstrapContext, BootstrapOutcome, BootstrapReport, LoadOutcome, ManifestSource,
    ModuleResult, PluginLoader,
};
pub use manifest::{Diagnostic, DiagnosticKind, Manifest};
pub use platform::{
    ErrorDecoder, LibraryHost, NativeHost, OsEnvironment, OsErrorDecoder, NOT_FOUND,
};
pub use resolver::{FixedEnvironment, PathResolver, SearchEnvironment, SearchLocation};

/// Run one bootstrap pass with the native collaborators of this platform.
pub fn bootstrap(config: BootstrapConfig, host: &mut NativeHost) -> Result<BootstrapOutcome> {
    let checker = ImportTableChecker::new(OsEnvironment::with_library_dir(&config.mods_dir));
    let mut console = StdConsole;
    let mut ctx = BootstrapContext {
        host,
        decoder: &OsErrorDecoder,
        checker: &checker,
        console: &mut console,
    };
    PluginLoader::new(config).run(&mut ctx)
}
