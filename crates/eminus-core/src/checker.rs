//! Root-cause diagnosis for "module not found" load failures.
//!
//! The OS reports the same code whether the plugin itself is missing or one
//! of the libraries it imports is. The checker tells the two apart by
//! reading the plugin's import table and resolving every entry.

use std::fmt;

use crate::imports;
use crate::platform::LibraryHost;
use crate::resolver::{PathResolver, SearchEnvironment};

/// Outcome of inspecting a module that failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyReport {
    /// The module file itself was not found in any search location.
    ModuleMissing { module: String },

    /// The module exists but these imported libraries do not resolve.
    MissingImports {
        module: String,
        missing: Vec<String>,
    },

    /// Every import resolves; the failure lies elsewhere.
    AllResolved { module: String },

    /// The module exists but its import table could not be read.
    Unreadable { module: String, reason: String },
}

impl fmt::Display for DependencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyReport::ModuleMissing { module } => {
                write!(f, "{}: module not found", module)
            }
            DependencyReport::MissingImports { module, missing } => {
                write!(f, "{}: missing dependencies: {}", module, missing.join(", "))
            }
            DependencyReport::AllResolved { module } => {
                write!(f, "{}: all dependencies resolved", module)
            }
            DependencyReport::Unreadable { module, reason } => {
                write!(f, "{}: cannot inspect imports: {}", module, reason)
            }
        }
    }
}

/// Diagnoses why a module could not be found.
pub trait DependencyChecker {
    fn check(&self, module: &str, host: &dyn LibraryHost) -> DependencyReport;
}

/// Checker that walks the module's import table with a [`PathResolver`].
pub struct ImportTableChecker<E> {
    resolver: PathResolver<E>,
}

impl<E: SearchEnvironment> ImportTableChecker<E> {
    pub fn new(env: E) -> Self {
        Self {
            resolver: PathResolver::new(env),
        }
    }

    fn resolves(&self, name: &str, host: &dyn LibraryHost) -> bool {
        is_api_set(name) || host.is_loaded(name) || self.resolver.resolve(name).is_some()
    }
}

/// Windows API-set contracts are virtual and never exist as files.
fn is_api_set(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.starts_with("api-ms-") || lower.starts_with("ext-ms-")
}

impl<E: SearchEnvironment> DependencyChecker for ImportTableChecker<E> {
    fn check(&self, module: &str, host: &dyn LibraryHost) -> DependencyReport {
        let module_name = module.to_string();

        let Some(path) = self.resolver.resolve(module) else {
            return DependencyReport::ModuleMissing {
                module: module_name,
            };
        };

        let imports = match imports::read_imports(&path) {
            Ok(imports) => imports,
            Err(e) => {
                tracing::warn!(module, error = %e, "failed to read import table");
                return DependencyReport::Unreadable {
                    module: module_name,
                    reason: e.to_string(),
                };
            }
        };

        let missing: Vec<String> = imports
            .into_iter()
            .filter(|name| !self.resolves(name, host))
            .collect();

        if missing.is_empty() {
            DependencyReport::AllResolved {
                module: module_name,
            }
        } else {
            DependencyReport::MissingImports {
                module: module_name,
                missing,
            }
        }
    }
}
