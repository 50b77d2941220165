use std::path::{Path, PathBuf};
use thiserror::Error;

/// Library error type for playback operations.
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// A referenced file or folder does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request parameters were missing or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The request names something outside the allowed set.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Disk read/write/rename failure.
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Spawning or signalling an external process failed.
    #[error("external process {program}: {message}")]
    ExternalProcess { program: String, message: String },

    /// A blocking worker panicked or was cancelled before finishing.
    #[error("background task failed: {0}")]
    Task(String),
}

pub type Result<T, E = PlaybackError> = std::result::Result<T, E>;

impl PlaybackError {
    pub fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn process(program: &str, message: impl Into<String>) -> Self {
        Self::ExternalProcess {
            program: program.to_string(),
            message: message.into(),
        }
    }
}

/// Attach the failing path to an io error, mirroring `anyhow::Context`.
pub trait IoContext<T> {
    fn at(self, action: &'static str, path: &Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, action: &'static str, path: &Path) -> Result<T> {
        self.map_err(|source| PlaybackError::io(action, path, source))
    }
}
