//! # Errors
//!
//! Failure taxonomy shared by the whole crate. Every variant stems from an
//! input invariant, so nothing here is retried: errors are surfaced to the
//! caller as-is.

use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, PortfolioError>;

/// Errors produced by the forecasting pipeline.
#[derive(Error, Debug)]
pub enum PortfolioError {
  /// Price table has no rows or no columns.
  #[error("empty price series")]
  EmptyPrices,

  /// Price table dimensions disagree with their labels.
  #[error("misaligned price series: {message}")]
  MisalignedData { message: String },

  /// Not enough usable observations to compute the requested statistic.
  #[error("insufficient data: need at least {required} rows, got {available}")]
  InsufficientData { required: usize, available: usize },

  /// Supplied weights violate the simplex invariants.
  #[error("invalid weights: {0}")]
  InvalidWeights(String),

  /// A scalar parameter is out of its admissible range.
  #[error("invalid parameter: {0}")]
  InvalidParameter(String),

  /// Input shapes disagree between the mean vector, covariance and weights.
  #[error("covariance shape mismatch: expected {expected}x{expected}, got {rows}x{cols}")]
  CovarianceShape {
    expected: usize,
    rows: usize,
    cols: usize,
  },

  /// The solver stopped without converging. Carries the last iterate mapped
  /// back to weight space so the caller can inspect where the solve ended.
  #[error("optimization failed: {diagnostic}")]
  OptimizationFailed {
    diagnostic: String,
    last_weights: Vec<f64>,
  },

  /// The target return cannot be reached by any long-only weight vector.
  #[error(
    "infeasible target return {target_return}: achievable range is [{min_return}, {max_return}]"
  )]
  OptimizationInfeasible {
    target_return: f64,
    min_return: f64,
    max_return: f64,
  },

  /// Covariance matrix admits no PSD factorization, so correlated sampling
  /// is ill-defined.
  #[error("covariance is not positive semi-definite: {0}")]
  NotPositiveSemiDefinite(String),
}
