//! Error types for covgen
//!
//! Candidate rejections (build failures, no coverage gain) are outcomes, not
//! errors. Everything here either aborts the current file or the whole run.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, GenError>;

#[derive(Debug, thiserror::Error)]
pub enum GenError {
    /// The caller fired the cancellation token
    #[error("process cancelled by user")]
    Cancelled,

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("couldn't identify the source files. Please mention source file and test file using flags")]
    NoSourceFiles,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{action} '{}': {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start command '{command}': {source}")]
    Command {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error in coverage processing: {0}")]
    Coverage(String),

    #[error("model call failed: {0}")]
    Model(String),

    #[error("could not parse model response: {0}")]
    Parse(String),

    #[error("failed to update imports: {0}")]
    Imports(String),

    #[error("failed to list installed dependencies: {0}")]
    Dependencies(String),

    #[error("failed to analyze the {what} after {attempts} attempts")]
    CursorResolution { what: &'static str, attempts: u32 },
}

impl GenError {
    pub fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GenError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GenError::Cancelled)
    }
}

/// A library install command exited non-zero.
///
/// Carries the packages that did install before the failure so the caller
/// can roll them back.
#[derive(Debug, thiserror::Error)]
#[error("failed to install library with '{command}': {reason}")]
pub struct InstallError {
    pub command: String,
    pub reason: String,
    pub installed: Vec<String>,
}
