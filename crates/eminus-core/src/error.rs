//! Error types for plugin bootstrap.

use std::path::PathBuf;

/// Result type alias for bootstrap operations.
pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Failure reported by the load primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    /// The OS rejected the load with a numeric error code.
    #[error("OS error {code}: {message}")]
    Os { code: u32, message: String },

    /// The load failed without a numeric error code.
    #[error("{0}")]
    Unexpected(String),
}

impl LoadError {
    pub fn os(code: u32, message: impl Into<String>) -> Self {
        Self::Os {
            code,
            message: message.into(),
        }
    }

    /// Numeric OS code, if the failure carried one.
    pub fn code(&self) -> Option<u32> {
        match self {
            LoadError::Os { code, .. } => Some(*code),
            LoadError::Unexpected(_) => None,
        }
    }
}

/// Errors raised while reading a library's import table.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The image could not be read from disk.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Neither a PE nor an ELF image.
    #[error("Unrecognized image format")]
    UnknownFormat,

    /// A header or table points outside the file.
    #[error("Malformed image: {0}")]
    Malformed(String),
}

/// Fatal errors of a bootstrap run.
///
/// A missing module is not one of these: it ends the run through
/// [`crate::loader::BootstrapOutcome::Aborted`] so the caller can exit with
/// the OS code.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// The load primitive failed without a numeric error code.
    #[error("Unexpected failure loading {module}: {reason}")]
    Unexpected { module: String, reason: String },

    /// The plugin directory exists but could not be listed.
    #[error("Failed to scan {dir}: {source}")]
    ScanFailed {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_code() {
        assert_eq!(LoadError::os(126, "missing").code(), Some(126));
        assert_eq!(LoadError::Unexpected("boom".into()).code(), None);
    }

    #[test]
    fn test_error_display() {
        let err = BootstrapError::Unexpected {
            module: "a.dll".into(),
            reason: "boom".into(),
        };
        assert_eq!(err.to_string(), "Unexpected failure loading a.dll: boom");
    }
}
