//! # Error
//!
//! $$
//! \text{fit}\cup\text{sample}\cup\text{score}\to\text{Result}
//! $$
//!
use thiserror::Error;

/// Error taxonomy for the estimation and simulation pipeline.
///
/// Errors are raised at the point of detection and never downgraded; a
/// failed trial aborts the whole run.
#[derive(Debug, Error)]
pub enum VineError {
  /// Malformed or degenerate input: constant columns, too few rows,
  /// values outside the unit interval.
  #[error("invalid input: {0}")]
  InvalidInput(String),

  /// Copula or tree parameter estimation did not converge.
  #[error("fitting failed: {0}")]
  Fitting(String),

  /// Invalid sample-size request.
  #[error("invalid sampling request: {0}")]
  Sampling(String),

  /// Column-count mismatch between compared matrices.
  #[error("dimension mismatch: {0}")]
  Dimension(String),
}

pub type Result<T> = std::result::Result<T, VineError>;
