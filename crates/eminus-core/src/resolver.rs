//! Shared-library path resolution.
//!
//! Mirrors the order a native loader walks when it is handed a bare file
//! name: the executable's directory, the process library-directory override,
//! the system directory, the OS installation directory, then every entry of
//! the search-path variable. The first location holding a regular file with
//! that name wins.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Source of the directories consulted by [`PathResolver`].
///
/// Each method is queried lazily and may return `None` when the location is
/// unavailable; such a location simply yields no candidate.
pub trait SearchEnvironment {
    /// Directory containing the running executable.
    fn executable_dir(&self) -> Option<PathBuf>;

    /// Process-configured library directory override.
    fn library_dir(&self) -> Option<PathBuf>;

    /// OS system library directory.
    fn system_dir(&self) -> Option<PathBuf>;

    /// OS installation directory.
    fn installation_dir(&self) -> Option<PathBuf>;

    /// Raw search-path list, delimited with the platform separator.
    fn search_path(&self) -> Option<OsString>;
}

/// One step of the search order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchLocation {
    ExecutableDir,
    LibraryDir,
    SystemDir,
    InstallationDir,
    SearchPath,
}

impl SearchLocation {
    /// Fixed evaluation order.
    pub const ORDER: [SearchLocation; 5] = [
        SearchLocation::ExecutableDir,
        SearchLocation::LibraryDir,
        SearchLocation::SystemDir,
        SearchLocation::InstallationDir,
        SearchLocation::SearchPath,
    ];

    /// Directories this location contributes, in order.
    pub fn directories<E: SearchEnvironment + ?Sized>(self, env: &E) -> Vec<PathBuf> {
        match self {
            SearchLocation::ExecutableDir => env.executable_dir().into_iter().collect(),
            SearchLocation::LibraryDir => env.library_dir().into_iter().collect(),
            SearchLocation::SystemDir => env.system_dir().into_iter().collect(),
            SearchLocation::InstallationDir => env.installation_dir().into_iter().collect(),
            SearchLocation::SearchPath => env
                .search_path()
                .map(|list| {
                    std::env::split_paths(&list)
                        .filter(|dir| !dir.as_os_str().is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

/// A resolved library file and the location it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub location: SearchLocation,
    pub path: PathBuf,
}

/// Resolves bare library names against a [`SearchEnvironment`].
///
/// Nothing is cached; every call re-reads the environment and the
/// filesystem.
#[derive(Debug, Clone)]
pub struct PathResolver<E> {
    env: E,
}

impl<E: SearchEnvironment> PathResolver<E> {
    pub fn new(env: E) -> Self {
        Self { env }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    /// Full path of the first regular file named `filename`, if any.
    pub fn resolve(&self, filename: impl AsRef<Path>) -> Option<PathBuf> {
        self.resolve_with_location(filename).map(|r| r.path)
    }

    /// Like [`PathResolver::resolve`], also reporting the winning location.
    pub fn resolve_with_location(&self, filename: impl AsRef<Path>) -> Option<Resolved> {
        let filename = filename.as_ref();

        for location in SearchLocation::ORDER {
            for dir in location.directories(&self.env) {
                let candidate = dir.join(filename);
                if is_regular_file(&candidate) {
                    tracing::trace!(?location, path = %candidate.display(), "resolved library");
                    return Some(Resolved {
                        location,
                        path: candidate,
                    });
                }
            }
        }

        tracing::trace!(name = %filename.display(), "library not found in any search location");
        None
    }
}

fn is_regular_file(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Environment with explicitly provided locations.
///
/// Useful for embedders with a private library layout, and for tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedEnvironment {
    pub executable_dir: Option<PathBuf>,
    pub library_dir: Option<PathBuf>,
    pub system_dir: Option<PathBuf>,
    pub installation_dir: Option<PathBuf>,
    pub search_path: Option<OsString>,
}

impl SearchEnvironment for FixedEnvironment {
    fn executable_dir(&self) -> Option<PathBuf> {
        self.executable_dir.clone()
    }

    fn library_dir(&self) -> Option<PathBuf> {
        self.library_dir.clone()
    }

    fn system_dir(&self) -> Option<PathBuf> {
        self.system_dir.clone()
    }

    fn installation_dir(&self) -> Option<PathBuf> {
        self.installation_dir.clone()
    }

    fn search_path(&self) -> Option<OsString> {
        self.search_path.clone()
    }
}
