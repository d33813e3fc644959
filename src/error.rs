use std::path::PathBuf;
use thiserror::Error;

/// Failure taxonomy for the pipeline.
///
/// Malformed forensic fields (distances that fail to parse) are not part of
/// this taxonomy on purpose: they are recovered locally by skipping the
/// affected calibration adjustment and never propagate.
#[derive(Debug, Error)]
pub enum DeepSeeError {
    #[error("not found: {0}")]
    NotFound(PathBuf),

    #[error("input shape mismatch: got {got:?}, expected {expected:?}")]
    ShapeMismatch { got: Vec<i64>, expected: Vec<i64> },

    /// The custody log is the audit trail; a failed write is fatal.
    #[error("custody store failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("inference failure: {0}")]
    Inference(String),

    #[error("image decode failure: {0}")]
    ImageDecode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
