//! Error types for noise-grid computation.

use thiserror::Error;

/// Result type alias for noise-grid operations.
pub type Result<T> = std::result::Result<T, NoiseGridError>;

/// Errors that abort a noise-grid run.
///
/// Per-feature geometry problems and refinement non-convergence are not
/// errors; they are collected as warnings on the result value.
#[derive(Error, Debug)]
pub enum NoiseGridError {
    /// Configuration rejected before any computation started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Buildings were supplied but none survived sanitisation and there are
    /// no sources either, so nothing meaningful can be computed.
    #[error("no usable geometry: {0}")]
    NoUsableGeometry(String),

    /// The triangulation backend rejected the assembled point set.
    #[error("triangulation failed: {0}")]
    Triangulation(String),

    /// The run was cancelled between work batches.
    #[error("computation cancelled")]
    Cancelled,

    /// Serializing the record stream failed.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
