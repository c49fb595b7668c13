//! Bootstrap plugin loading.
//!
//! One synchronous pass: resolve the module list (manifest, or a scan of the
//! plugin directory when the manifest is absent), register the plugin
//! directory with the load primitive, then load each module in declaration
//! order. A module that is already resident is skipped. The first load
//! failure carrying an OS error code ends the run; for the "not found" code
//! the dependency checker names the missing import first.

use std::path::Path;

use crate::checker::DependencyChecker;
use crate::config::{BootstrapConfig, MANIFEST_FILE_NAME};
use crate::console::{Console, PREFIX};
use crate::error::{BootstrapError, LoadError, Result};
use crate::manifest::{self, Diagnostic, Manifest};
use crate::platform::{ErrorDecoder, LibraryHost, NOT_FOUND};

/// Per-module result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    AlreadyLoaded,
    Loaded,
    FailedNotFound(u32),
    FailedOtherOsError(u32),
    /// The load primitive failed without an OS error code.
    FailedNonOsException(String),
}

impl LoadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LoadOutcome::AlreadyLoaded | LoadOutcome::Loaded)
    }
}

/// A module name together with what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleResult {
    pub name: String,
    pub outcome: LoadOutcome,
}

/// Where the module list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestSource {
    /// Parsed from the manifest file.
    File,
    /// Synthesized from the plugin directory contents.
    DirectoryScan,
    /// No manifest and no plugin directory; nothing to do.
    NoPluginDir,
}

/// Everything a bootstrap run observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub source: ManifestSource,
    pub manifest: Manifest,
    pub diagnostics: Vec<Diagnostic>,
    pub modules: Vec<ModuleResult>,
}

impl BootstrapReport {
    fn new(source: ManifestSource, manifest: Manifest, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            source,
            manifest,
            diagnostics,
            modules: Vec::new(),
        }
    }
}

/// How a bootstrap run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Every listed module is resident.
    Completed(BootstrapReport),

    /// A module failed with an OS error code; the process should exit with
    /// `code`.
    Aborted {
        report: BootstrapReport,
        module: String,
        code: u32,
    },
}

impl BootstrapOutcome {
    pub fn report(&self) -> &BootstrapReport {
        match self {
            BootstrapOutcome::Completed(report) => report,
            BootstrapOutcome::Aborted { report, .. } => report,
        }
    }

    /// Process exit status for an aborted run.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            BootstrapOutcome::Completed(_) => None,
            BootstrapOutcome::Aborted { code, .. } => Some(*code as i32),
        }
    }
}

/// Collaborators and process state owned by one bootstrap run.
pub struct BootstrapContext<'a> {
    pub host: &'a mut dyn LibraryHost,
    pub decoder: &'a dyn ErrorDecoder,
    pub checker: &'a dyn DependencyChecker,
    pub console: &'a mut dyn Console,
}

/// Drives one bootstrap pass over the configured plugin directory.
#[derive(Debug, Clone)]
pub struct PluginLoader {
    config: BootstrapConfig,
}

impl PluginLoader {
    pub fn new(config: BootstrapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Run the bootstrap pass.
    ///
    /// Returns `Err` only for failures outside the recovery policy: a load
    /// error without an OS code, or an unreadable plugin directory.
    pub fn run(&self, ctx: &mut BootstrapContext<'_>) -> Result<BootstrapOutcome> {
        let mut report = match self.resolve_manifest(ctx.console)? {
            Some(report) => report,
            None => {
                return Ok(BootstrapOutcome::Completed(BootstrapReport::new(
                    ManifestSource::NoPluginDir,
                    Manifest::default(),
                    Vec::new(),
                )))
            }
        };
        let verbose = report.manifest.verbose;

        if verbose {
            ctx.console
                .info(&format!("{} v{}", PREFIX, env!("CARGO_PKG_VERSION")));
        }
        ctx.host.set_search_directory(&self.config.mods_dir);

        let modules = report.manifest.modules.clone();
        for name in modules
            .iter()
            .filter(|name| self.config.is_library_name(name))
        {
            let outcome = self.load_module(ctx, name, verbose);
            report.modules.push(ModuleResult {
                name: name.clone(),
                outcome: outcome.clone(),
            });

            match outcome {
                LoadOutcome::AlreadyLoaded | LoadOutcome::Loaded => {}
                LoadOutcome::FailedNotFound(code) | LoadOutcome::FailedOtherOsError(code) => {
                    tracing::warn!(module = %name, code, "aborting bootstrap");
                    return Ok(BootstrapOutcome::Aborted {
                        report,
                        module: name.clone(),
                        code,
                    });
                }
                LoadOutcome::FailedNonOsException(reason) => {
                    tracing::error!(module = %name, %reason, "load failed without an OS error code");
                    return Err(BootstrapError::Unexpected {
                        module: name.clone(),
                        reason,
                    });
                }
            }
        }

        Ok(BootstrapOutcome::Completed(report))
    }

    /// Check, load and, on failure, diagnose a single module.
    fn load_module(&self, ctx: &mut BootstrapContext<'_>, name: &str, verbose: bool) -> LoadOutcome {
        let path = self.config.mods_dir.join(name);
        let display = path.display();

        if ctx.host.is_loaded(name) {
            if verbose {
                ctx.console
                    .info(&format!("{} {} (Already loaded)", PREFIX, display));
            }
            tracing::debug!(module = %name, "already loaded");
            return LoadOutcome::AlreadyLoaded;
        }

        let err = match ctx.host.load(name) {
            Ok(()) => {
                if verbose {
                    ctx.console.info(&format!("{} {}", PREFIX, display));
                }
                return LoadOutcome::Loaded;
            }
            Err(err) => err,
        };

        ctx.console.alert(&format!("{} {}: Failed", PREFIX, display));

        let code = match err {
            LoadError::Os { code, .. } => code,
            LoadError::Unexpected(reason) => return LoadOutcome::FailedNonOsException(reason),
        };

        ctx.console.alert(&format!("Error Code: {}", code));
        ctx.console.alert(&format!(
            "Error Message: {}",
            ctx.decoder.decode(code, &[name])
        ));

        if code == NOT_FOUND {
            let diagnosis = ctx.checker.check(name, &*ctx.host);
            ctx.console.error(&format!("{} {}", PREFIX, diagnosis));
            LoadOutcome::FailedNotFound(code)
        } else {
            LoadOutcome::FailedOtherOsError(code)
        }
    }

    /// Read and parse the manifest, or scan the plugin directory in its
    /// absence. `None` means there is nothing to load.
    fn resolve_manifest(&self, console: &mut dyn Console) -> Result<Option<BootstrapReport>> {
        let config = &self.config;

        match std::fs::read(&config.manifest_path) {
            Ok(bytes) => {
                // Invalid UTF-8 is replaced; the manifest still applies.
                let text = String::from_utf8_lossy(&bytes);
                let file = config
                    .manifest_path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| MANIFEST_FILE_NAME.to_string());
                let (manifest, diagnostics) = manifest::parse_named(&file, &text);
                for diagnostic in &diagnostics {
                    console.error(&format!("{} {}", PREFIX, diagnostic));
                }
                tracing::debug!(
                    path = %config.manifest_path.display(),
                    modules = manifest.modules.len(),
                    "manifest parsed"
                );
                Ok(Some(BootstrapReport::new(
                    ManifestSource::File,
                    manifest,
                    diagnostics,
                )))
            }
            Err(e) => {
                tracing::debug!(path = %config.manifest_path.display(), error = %e, "manifest unavailable");

                if !config.mods_dir.is_dir() {
                    console.error(&format!(
                        "{} no {} directory, skip",
                        PREFIX,
                        config.mods_dir.display()
                    ));
                    return Ok(None);
                }

                console.error(&format!(
                    "{} no {}, It will load {}",
                    PREFIX,
                    config.manifest_path.display(),
                    config.mods_dir.join(format!("*.{}", config.library_extension)).display()
                ));
                let modules = scan_plugin_dir(&config.mods_dir, config)?;
                Ok(Some(BootstrapReport::new(
                    ManifestSource::DirectoryScan,
                    Manifest::from_modules(modules),
                    Vec::new(),
                )))
            }
        }
    }
}

/// File names directly inside `dir` carrying the configured library
/// extension (case-insensitive), sorted.
pub fn scan_plugin_dir(dir: &Path, config: &BootstrapConfig) -> Result<Vec<String>> {
    let scan_err = |source| BootstrapError::ScanFailed {
        dir: dir.to_path_buf(),
        source,
    };

    let mut modules = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        match entry.file_name().into_string() {
            Ok(name) if config.is_library_name(&name) => modules.push(name),
            Ok(_) => {}
            Err(name) => tracing::warn!(?name, "skipping non UTF-8 file name"),
        }
    }
    modules.sort();

    tracing::debug!(dir = %dir.display(), count = modules.len(), "plugin directory scanned");
    Ok(modules)
}
