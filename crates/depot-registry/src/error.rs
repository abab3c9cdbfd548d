use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("sha256 mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("failed to read package metadata from {}: {reason}", .path.display())]
    Build { path: PathBuf, reason: String },

    #[error("package '{name}' has no downloadable artifact")]
    NoArtifact { name: String },

    #[error(transparent)]
    Io(#[from] anyhow::Error),
}
