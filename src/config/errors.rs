//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while locating or loading `omcp.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config file at the pinned root or in any ancestor directory.
    #[error("could not find {file} (searched upward from {})", start.display())]
    NotFound {
        file: String,
        start: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("failed to read {}: {reason}", path.display())]
    ReadFailed {
        path: PathBuf,
        reason: String,
    },

    /// The file is not valid YAML or does not match the config schema.
    #[error("failed to parse {}: {reason}", path.display())]
    ParseFailed {
        path: PathBuf,
        reason: String,
    },
}
