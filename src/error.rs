//! Error type shared by both poisoning pipelines.

use thiserror::Error;

/// Errors produced while loading data, generating poisons or exporting them.
///
/// Numerical failures are never retried: a failed kernel solve or a
/// non-finite gradient aborts the current block or round.
#[derive(Error, Debug)]
pub enum PoisonError {
    /// Unsupported dataset or model selection, or an out-of-range hyperparameter.
    #[error("configuration error: {0}")]
    Config(String),

    /// Singular kernel solve, failed eigendecomposition, NaN or Inf values.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Tensor or batch dimensions that do not line up.
    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PoisonError>;
