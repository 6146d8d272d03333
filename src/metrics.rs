//! # Risk Metrics
//!
//! $$
//! \mathrm{VaR}_{95} = V_0 - q_{0.05},\qquad
//! \mathrm{CVaR}_{95} = V_0 - \mathbb E[V_T \mid V_T \le q_{0.05}]
//! $$
//!
//! Summary statistics over the terminal-value distribution of a simulation.
//! Pure functions of their inputs; degenerate distributions yield NaN in the
//! documented fields instead of failing.

use ndarray::Array1;

use crate::error::PortfolioError;
use crate::error::Result;

/// Fixed-shape record of terminal-distribution statistics.
///
/// `sharpe_like` divides the mean gain by the raw terminal standard
/// deviation. This is deliberately NOT the optimizer's risk-free-adjusted
/// Sharpe ratio; the two are distinct metrics and are named apart.
#[derive(Clone, Copy, Debug)]
pub struct RiskMetrics {
  /// Mean terminal portfolio value.
  pub mean: f64,
  /// Median terminal portfolio value.
  pub median: f64,
  /// Population standard deviation of terminal values.
  pub std_dev: f64,
  /// 5th percentile of terminal values (linear interpolation).
  pub percentile_5: f64,
  /// `initial_capital - percentile_5`; negative when the 5th percentile
  /// exceeds the initial capital, which is meaningful and kept as-is.
  pub var_95: f64,
  /// Expected shortfall below the 5th percentile; NaN if no terminal value
  /// falls at or below the threshold.
  pub cvar_95: f64,
  /// Fraction of terminal values strictly below the initial capital.
  pub prob_loss: f64,
  /// `(mean - initial_capital) / std_dev`; NaN when the distribution has
  /// zero spread.
  pub sharpe_like: f64,
}

/// Compute the terminal-distribution statistics for one simulation run.
pub fn risk_metrics(terminal: &Array1<f64>, initial_capital: f64) -> Result<RiskMetrics> {
  if terminal.is_empty() {
    return Err(PortfolioError::InvalidParameter(
      "terminal value vector is empty".to_string(),
    ));
  }
  if !(initial_capital.is_finite() && initial_capital > 0.0) {
    return Err(PortfolioError::InvalidParameter(format!(
      "initial capital must be positive, got {initial_capital}"
    )));
  }
  if terminal.iter().any(|v| !v.is_finite()) {
    return Err(PortfolioError::InvalidParameter(
      "terminal values contain non-finite entries".to_string(),
    ));
  }

  let count = terminal.len() as f64;
  let mean = terminal.sum() / count;
  let variance = terminal.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / count;
  let std_dev = variance.sqrt();

  let mut sorted = terminal.to_vec();
  sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
  let median = quantile(&sorted, 0.5);
  let percentile_5 = quantile(&sorted, 0.05);

  let var_95 = initial_capital - percentile_5;

  let tail: Vec<f64> = sorted.iter().copied().filter(|&v| v <= percentile_5).collect();
  let cvar_95 = if tail.is_empty() {
    f64::NAN
  } else {
    initial_capital - tail.iter().sum::<f64>() / tail.len() as f64
  };

  let prob_loss = terminal.iter().filter(|&&v| v < initial_capital).count() as f64 / count;

  let sharpe_like = if std_dev > 0.0 {
    (mean - initial_capital) / std_dev
  } else {
    f64::NAN
  };

  Ok(RiskMetrics {
    mean,
    median,
    std_dev,
    percentile_5,
    var_95,
    cvar_95,
    prob_loss,
    sharpe_like,
  })
}

/// Linear-interpolation quantile of an ascending-sorted sample, `q` in [0, 1].
fn quantile(sorted: &[f64], q: f64) -> f64 {
  let position = q * (sorted.len() - 1) as f64;
  let lower = position.floor() as usize;
  let upper = position.ceil() as usize;
  if lower == upper {
    return sorted[lower];
  }
  let fraction = position - lower as f64;
  sorted[lower] + fraction * (sorted[upper] - sorted[lower])
}
