use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during log writing operations.
///
/// These are fatal to the operation that produced them and are always
/// returned synchronously to the caller.
#[derive(Error, Debug)]
pub enum WriterError {
    /// Invalid writer configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Parent of the base path exists but is not a directory
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Renaming the active segment to its archive name failed
    #[error("failed to rotate {} to {}: {source}", .from.display(), .to.display())]
    Rotation {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The writer has been closed
    #[error("writer is closed")]
    Closed,

    /// I/O error when interacting with filesystem
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WriterError>;

/// Housekeeping failures that never block the write path.
///
/// Warnings are logged when they occur and buffered until drained with
/// [`RotatingWriter::take_warnings`](crate::RotatingWriter::take_warnings).
#[derive(Error, Debug)]
pub enum Warning {
    /// Compressing an archive failed; the plaintext archive was kept
    #[error("failed to compress {}: {source}", .path.display())]
    Compression {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Removing an expired backup failed
    #[error("failed to remove backup {}: {source}", .path.display())]
    Retention {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Warning {
    /// Path of the file the warning refers to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Warning::Compression { path, .. } | Warning::Retention { path, .. } => path,
        }
    }
}
