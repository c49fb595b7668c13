//! Bootstrap configuration defaults.

use std::path::{Path, PathBuf};

/// Default plugin directory, relative to the working directory.
pub const DEFAULT_MODS_DIR: &str = "mods";

/// Default manifest file name inside the plugin directory.
pub const MANIFEST_FILE_NAME: &str = "eminus.ini";

/// Environment variable names.
pub mod env_vars {
    pub const LOG_FILTER: &str = "RUST_LOG";
    pub const LOG_JSON: &str = "EMINUS_LOG_JSON";
}

/// Where plugins live and which files count as plugins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Directory scanned when the manifest is absent, and added to the
    /// library search path before any load.
    pub mods_dir: PathBuf,

    /// Manifest file location.
    pub manifest_path: PathBuf,

    /// Shared-library extension without the dot, compared case-insensitively.
    pub library_extension: String,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        let mods_dir = PathBuf::from(DEFAULT_MODS_DIR);
        Self {
            manifest_path: mods_dir.join(MANIFEST_FILE_NAME),
            mods_dir,
            library_extension: std::env::consts::DLL_EXTENSION.to_string(),
        }
    }
}

impl BootstrapConfig {
    /// Configuration rooted at `mods_dir`, with the manifest inside it.
    pub fn with_mods_dir(mods_dir: impl AsRef<Path>) -> Self {
        let mods_dir = mods_dir.as_ref().to_path_buf();
        Self {
            manifest_path: mods_dir.join(MANIFEST_FILE_NAME),
            mods_dir,
            ..Self::default()
        }
    }

    pub fn with_manifest_path(mut self, path: impl AsRef<Path>) -> Self {
        self.manifest_path = path.as_ref().to_path_buf();
        self
    }

    pub fn with_library_extension(mut self, ext: impl Into<String>) -> Self {
        self.library_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    /// Whether `name` carries the shared-library extension.
    pub fn is_library_name(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(&self.library_extension))
            .unwrap_or(false)
    }
}
