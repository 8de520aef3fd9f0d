//! # Design
//!
//! - Centralize file engine error context without using `anyhow`.
//! - Keep error messages constant; store operational context in fields.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

/// Errors attached to completion events raised by the file-backed engine.
#[derive(Debug)]
pub enum EngineError {
    /// The backup device could not be opened.
    DeviceUnavailable {
        /// Resolved device path.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// The source database does not exist.
    DatabaseMissing {
        /// Database name.
        database: String,
    },
    /// Restore target exists and the request did not ask to replace it.
    DatabaseExists {
        /// Database name.
        database: String,
    },
    /// A differential restore targeted a database that is not restoring.
    NotRestoring {
        /// Database name.
        database: String,
    },
    /// Artifact payload did not match the recorded checksum.
    ChecksumMismatch {
        /// Resolved device path.
        path: PathBuf,
    },
    /// The source database changed while it was being copied.
    SourceChanged {
        /// Database name.
        database: String,
    },
    /// The artifact header could not be read.
    ArtifactFormat {
        /// Resolved device path.
        path: PathBuf,
        /// Static reason describing the problem.
        reason: &'static str,
    },
    /// The caller asked the engine to stop.
    Aborted {
        /// Operation that was interrupted.
        operation: &'static str,
    },
    /// A filesystem call failed mid-operation.
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

impl Display for EngineError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceUnavailable { path, .. } => {
                let _ = path;
                formatter.write_str("backup device unavailable")
            }
            Self::DatabaseMissing { database } => {
                let _ = database;
                formatter.write_str("database does not exist")
            }
            Self::DatabaseExists { database } => {
                let _ = database;
                formatter.write_str("database already exists")
            }
            Self::NotRestoring { database } => {
                let _ = database;
                formatter.write_str("database is not in the restoring state")
            }
            Self::ChecksumMismatch { path } => {
                let _ = path;
                formatter.write_str("backup checksum mismatch")
            }
            Self::SourceChanged { database } => {
                let _ = database;
                formatter.write_str("database changed during backup")
            }
            Self::ArtifactFormat { path, reason } => {
                let _ = (path, reason);
                formatter.write_str("backup artifact is malformed")
            }
            Self::Aborted { operation } => {
                let _ = operation;
                formatter.write_str("operation aborted")
            }
            Self::Io {
                operation, path, ..
            } => {
                let _ = (operation, path);
                formatter.write_str("engine IO failure")
            }
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DeviceUnavailable { source, .. } | Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl EngineError {
    pub(crate) fn io(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn engine_error_display_and_source() {
        let cases = vec![
            (
                EngineError::DeviceUnavailable {
                    path: PathBuf::from("missing/northwind.bak"),
                    source: io::Error::from(io::ErrorKind::NotFound),
                },
                "backup device unavailable",
                true,
            ),
            (
                EngineError::DatabaseMissing {
                    database: "Northwind".to_string(),
                },
                "database does not exist",
                false,
            ),
            (
                EngineError::DatabaseExists {
                    database: "Northwind".to_string(),
                },
                "database already exists",
                false,
            ),
            (
                EngineError::NotRestoring {
                    database: "Northwind".to_string(),
                },
                "database is not in the restoring state",
                false,
            ),
            (
                EngineError::ChecksumMismatch {
                    path: PathBuf::from("northwind.bak"),
                },
                "backup checksum mismatch",
                false,
            ),
            (
                EngineError::SourceChanged {
                    database: "Northwind".to_string(),
                },
                "database changed during backup",
                false,
            ),
            (
                EngineError::ArtifactFormat {
                    path: PathBuf::from("northwind.bak"),
                    reason: "missing header",
                },
                "backup artifact is malformed",
                false,
            ),
            (
                EngineError::Aborted { operation: "copy" },
                "operation aborted",
                false,
            ),
            (
                EngineError::io("write", "northwind.bak", io::Error::other("disk full")),
                "engine IO failure",
                true,
            ),
        ];

        for (err, message, has_source) in cases {
            assert_eq!(err.to_string(), message);
            assert_eq!(err.source().is_some(), has_source);
        }
    }
}
