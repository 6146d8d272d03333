//! # Portfolio Optimizer
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}\in\Delta^{N}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Long-only allocation over the unit simplex. Both operations run Nelder-Mead
//! on a softmax reparameterization of the weights, so the simplex constraints
//! hold by construction and the solve starts from the equal-weight point.

use argmin::core::CostFunction;
use argmin::core::Executor;
use argmin::core::TerminationReason;
use argmin::core::TerminationStatus;
use argmin::solver::neldermead::NelderMead;
use ndarray::Array1;
use ndarray::Array2;
use ndarray_stats::QuantileExt;
use tracing::debug;
use tracing::warn;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::simulation::psd_lower_cholesky;

/// Tolerance on the weight-sum invariant.
pub const WEIGHT_SUM_TOL: f64 = 1e-6;

/// Portfolio volatility below this is treated as a division-by-zero hazard.
const VOL_EPS: f64 = 1e-12;

/// Quadratic penalty tying the solve to the target-return equality. Large
/// enough that the penalty-equilibrium residual sits well inside
/// [`TARGET_TOL`] for frontier slopes of realistic magnitude.
const RETURN_PENALTY: f64 = 1e4;

/// Admissible residual on the target-return equality after the solve.
const TARGET_TOL: f64 = 1e-3;

/// Long-only weight vector on the unit simplex.
///
/// Invariants are checked once at construction and the vector is never
/// mutated afterwards; every optimization or run produces a fresh instance.
#[derive(Clone, Debug, PartialEq)]
pub struct Weights(Array1<f64>);

impl Weights {
  /// Validate the simplex invariants and wrap the vector.
  pub fn new(w: Array1<f64>) -> Result<Self> {
    if w.is_empty() {
      return Err(PortfolioError::InvalidWeights(
        "weight vector is empty".to_string(),
      ));
    }
    if w.iter().any(|x| !x.is_finite()) {
      return Err(PortfolioError::InvalidWeights(
        "weight vector contains non-finite entries".to_string(),
      ));
    }
    if let Some(bad) = w.iter().find(|&&x| !(-1e-9..=1.0 + 1e-9).contains(&x)) {
      return Err(PortfolioError::InvalidWeights(format!(
        "weight {bad} outside [0, 1]"
      )));
    }
    let sum = w.sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOL {
      return Err(PortfolioError::InvalidWeights(format!(
        "weights sum to {sum}, expected 1"
      )));
    }

    Ok(Self(w))
  }

  /// The 1/N allocation used to seed every solve.
  pub fn equal(n: usize) -> Result<Self> {
    if n == 0 {
      return Err(PortfolioError::InvalidWeights(
        "weight vector is empty".to_string(),
      ));
    }
    Ok(Self(Array1::from_elem(n, 1.0 / n as f64)))
  }

  /// Borrow the underlying vector.
  pub fn as_array(&self) -> &Array1<f64> {
    &self.0
  }

  /// Number of assets.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Copy out as a plain vector, e.g. for display pairing with tickers.
  pub fn to_vec(&self) -> Vec<f64> {
    self.0.to_vec()
  }
}

/// Solved allocation together with its model statistics.
#[derive(Clone, Debug)]
pub struct OptimizedPortfolio {
  /// Final portfolio weights.
  pub weights: Weights,
  /// Model expected portfolio return (annualized if inputs are annualized).
  pub expected_return: f64,
  /// Model portfolio volatility.
  pub volatility: f64,
  /// Sharpe ratio computed as `(expected_return - risk_free) / volatility`.
  pub sharpe: f64,
}

/// Mean-variance optimizer over expected returns and a covariance matrix.
#[derive(Clone, Debug)]
pub struct PortfolioOptimizer {
  mu: Array1<f64>,
  cov: Array2<f64>,
  risk_free: f64,
}

impl PortfolioOptimizer {
  /// Validate shapes and covariance admissibility up front.
  ///
  /// The covariance must be symmetric with a PSD factorization within
  /// tolerance; anything else is rejected here rather than surfacing as NaN
  /// mid-solve.
  pub fn new(mu: Array1<f64>, cov: Array2<f64>, risk_free: f64) -> Result<Self> {
    let n = mu.len();
    if n == 0 {
      return Err(PortfolioError::InvalidParameter(
        "expected returns vector is empty".to_string(),
      ));
    }
    if mu.iter().any(|x| !x.is_finite()) {
      return Err(PortfolioError::InvalidParameter(
        "expected returns contain non-finite entries".to_string(),
      ));
    }
    if cov.nrows() != n || cov.ncols() != n {
      return Err(PortfolioError::CovarianceShape {
        expected: n,
        rows: cov.nrows(),
        cols: cov.ncols(),
      });
    }
    psd_lower_cholesky(&cov)?;

    Ok(Self {
      mu,
      cov,
      risk_free,
    })
  }

  /// Expected portfolio return for a given allocation.
  pub fn expected_return(&self, weights: &Weights) -> f64 {
    weights.as_array().dot(&self.mu)
  }

  /// Portfolio volatility for a given allocation.
  pub fn volatility(&self, weights: &Weights) -> f64 {
    let w = weights.as_array();
    w.dot(&self.cov.dot(w)).max(0.0).sqrt()
  }

  /// Maximize the Sharpe ratio over the long-only simplex.
  pub fn maximize_sharpe(&self) -> Result<OptimizedPortfolio> {
    let n = self.mu.len();
    if n == 1 {
      return self.finish(vec![1.0]);
    }

    // With every simplex point strictly positive, a vanishing portfolio
    // volatility means the covariance itself is degenerate.
    if self.cov.iter().all(|c| c.abs() < VOL_EPS) {
      return Err(PortfolioError::OptimizationFailed {
        diagnostic: "covariance is identically zero, Sharpe ratio is undefined".to_string(),
        last_weights: Weights::equal(n)?.to_vec(),
      });
    }

    struct SharpeCost {
      mu: Array1<f64>,
      cov: Array2<f64>,
      risk_free: f64,
    }

    impl CostFunction for SharpeCost {
      type Param = Vec<f64>;
      type Output = f64;

      fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let w = softmax(x);
        let vol = w.dot(&self.cov.dot(&w)).max(0.0).sqrt();
        if vol < VOL_EPS {
          return Err(argmin::core::Error::msg(
            "portfolio volatility vanished at trial point",
          ));
        }
        Ok(-(w.dot(&self.mu) - self.risk_free) / vol)
      }
    }

    let cost = SharpeCost {
      mu: self.mu.clone(),
      cov: self.cov.clone(),
      risk_free: self.risk_free,
    };

    let best = run_simplex_solver(cost, n)?;
    self.finish(softmax(&best).to_vec())
  }

  /// Minimize volatility subject to a target expected return.
  ///
  /// The equality constraint enters as a quadratic penalty; the residual is
  /// verified after the solve so a miss is reported instead of silently
  /// returning an off-target allocation.
  pub fn minimize_volatility(&self, target_return: f64) -> Result<OptimizedPortfolio> {
    let n = self.mu.len();
    let min_return = *self
      .mu
      .min()
      .map_err(|e| PortfolioError::InvalidParameter(e.to_string()))?;
    let max_return = *self
      .mu
      .max()
      .map_err(|e| PortfolioError::InvalidParameter(e.to_string()))?;

    // Long-only weights keep the portfolio return inside the hull of `mu`.
    if target_return < min_return - 1e-9 || target_return > max_return + 1e-9 {
      return Err(PortfolioError::OptimizationInfeasible {
        target_return,
        min_return,
        max_return,
      });
    }

    if n == 1 {
      return self.finish(vec![1.0]);
    }

    struct VolatilityCost {
      mu: Array1<f64>,
      cov: Array2<f64>,
      target_return: f64,
    }

    impl CostFunction for VolatilityCost {
      type Param = Vec<f64>;
      type Output = f64;

      fn cost(&self, x: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let w = softmax(x);
        let vol = w.dot(&self.cov.dot(&w)).max(0.0).sqrt();
        let residual = w.dot(&self.mu) - self.target_return;
        Ok(vol + RETURN_PENALTY * residual * residual)
      }
    }

    let cost = VolatilityCost {
      mu: self.mu.clone(),
      cov: self.cov.clone(),
      target_return,
    };

    let best = run_simplex_solver(cost, n)?;
    let solved = self.finish(softmax(&best).to_vec())?;

    let residual = solved.expected_return - target_return;
    if residual.abs() > TARGET_TOL {
      return Err(PortfolioError::OptimizationFailed {
        diagnostic: format!(
          "target-return residual {residual:.6} exceeds tolerance {TARGET_TOL}"
        ),
        last_weights: solved.weights.to_vec(),
      });
    }

    Ok(solved)
  }

  /// Final documented step: renormalize numerical slack on the sum
  /// constraint, then re-validate the invariants.
  fn finish(&self, mut w: Vec<f64>) -> Result<OptimizedPortfolio> {
    let sum: f64 = w.iter().sum();
    if (sum - 1.0).abs() > WEIGHT_SUM_TOL {
      warn!(sum, "renormalizing solver output onto the unit simplex");
      for wi in &mut w {
        *wi /= sum;
      }
    }

    let weights = Weights::new(Array1::from(w))?;
    let expected_return = self.expected_return(&weights);
    let volatility = self.volatility(&weights);
    let sharpe = if volatility > VOL_EPS {
      (expected_return - self.risk_free) / volatility
    } else {
      0.0
    };
    debug!(expected_return, volatility, sharpe, "optimizer finished");

    Ok(OptimizedPortfolio {
      weights,
      expected_return,
      volatility,
      sharpe,
    })
  }
}

/// Softmax maps the unconstrained solver space onto the open simplex.
fn softmax(x: &[f64]) -> Array1<f64> {
  let max_x = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
  let exps: Vec<f64> = x.iter().map(|&v| (v - max_x).exp()).collect();
  let sum: f64 = exps.iter().sum();

  if sum < 1e-15 {
    Array1::from_elem(x.len(), 1.0 / x.len() as f64)
  } else {
    Array1::from(exps) / sum
  }
}

/// Run Nelder-Mead from the equal-weight point (`softmax(0) = 1/N`).
///
/// Non-convergence surfaces as [`PortfolioError::OptimizationFailed`] with
/// the last iterate mapped back to weight space; it is never papered over
/// with a default allocation.
fn run_simplex_solver<C>(cost: C, n: usize) -> Result<Vec<f64>>
where
  C: CostFunction<Param = Vec<f64>, Output = f64>,
{
  let x0 = vec![0.0; n];
  let mut simplex = Vec::with_capacity(n + 1);
  simplex.push(x0.clone());
  for i in 0..n {
    let mut point = x0.clone();
    point[i] = 1.0;
    simplex.push(point);
  }

  let equal = Weights::equal(n)?.to_vec();
  let solver = NelderMead::new(simplex)
    .with_sd_tolerance(1e-8)
    .map_err(|e| PortfolioError::OptimizationFailed {
      diagnostic: e.to_string(),
      last_weights: equal.clone(),
    })?;

  let res = Executor::new(cost, solver)
    .configure(|state| state.max_iters(5000))
    .run()
    .map_err(|e| PortfolioError::OptimizationFailed {
      diagnostic: e.to_string(),
      last_weights: equal.clone(),
    })?;

  let Some(best) = res.state.best_param.clone() else {
    return Err(PortfolioError::OptimizationFailed {
      diagnostic: "solver produced no iterate".to_string(),
      last_weights: equal,
    });
  };

  match &res.state.termination_status {
    TerminationStatus::Terminated(TerminationReason::SolverConverged) => Ok(best),
    status => Err(PortfolioError::OptimizationFailed {
      diagnostic: format!("solver stopped without converging: {status:?}"),
      last_weights: softmax(&best).to_vec(),
    }),
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;

  fn two_asset_optimizer() -> PortfolioOptimizer {
    PortfolioOptimizer::new(
      array![0.1, 0.12],
      array![[0.04, 0.006], [0.006, 0.09]],
      0.0,
    )
    .unwrap()
  }

  #[test]
  fn sharpe_weights_satisfy_simplex_invariants() {
    let solved = two_asset_optimizer().maximize_sharpe().unwrap();

    let sum: f64 = solved.weights.to_vec().iter().sum();
    assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
    assert!(solved.weights.to_vec().iter().all(|&w| (0.0..=1.0).contains(&w)));
  }

  #[test]
  fn sharpe_solution_beats_equal_weights() {
    let optimizer = two_asset_optimizer();
    let solved = optimizer.maximize_sharpe().unwrap();

    let equal = Weights::equal(2).unwrap();
    let equal_sharpe = optimizer.expected_return(&equal) / optimizer.volatility(&equal);
    assert!(solved.sharpe >= equal_sharpe - 1e-6);
  }

  #[test]
  fn min_volatility_hits_the_target_return() {
    let optimizer = PortfolioOptimizer::new(
      array![0.08, 0.1, 0.12],
      array![
        [0.04, 0.01, 0.0],
        [0.01, 0.09, 0.02],
        [0.0, 0.02, 0.16]
      ],
      0.02,
    )
    .unwrap();

    let solved = optimizer.minimize_volatility(0.1).unwrap();
    assert_abs_diff_eq!(solved.expected_return, 0.1, epsilon = 1e-3);
    let sum: f64 = solved.weights.to_vec().iter().sum();
    assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
  }

  #[test]
  fn min_volatility_never_beats_itself_at_the_mean_target() {
    // Identical expected returns make the mean target reachable by every
    // allocation, so both solves should land near the variance minimum.
    let optimizer = PortfolioOptimizer::new(
      array![0.1, 0.1],
      array![[0.04, 0.0], [0.0, 0.04]],
      0.0,
    )
    .unwrap();

    let min_vol = optimizer.minimize_volatility(0.1).unwrap();
    let sharpe = optimizer.maximize_sharpe().unwrap();
    assert!(min_vol.volatility <= sharpe.volatility + 1e-4);
  }

  #[test]
  fn unreachable_target_is_infeasible() {
    let result = two_asset_optimizer().minimize_volatility(0.5);

    assert!(matches!(
      result,
      Err(PortfolioError::OptimizationInfeasible {
        target_return,
        ..
      }) if target_return == 0.5
    ));
  }

  #[test]
  fn zero_covariance_rejects_sharpe_solve() {
    let optimizer =
      PortfolioOptimizer::new(array![0.1, 0.12], Array2::zeros((2, 2)), 0.0).unwrap();

    assert!(matches!(
      optimizer.maximize_sharpe(),
      Err(PortfolioError::OptimizationFailed { .. })
    ));
  }

  #[test]
  fn asymmetric_covariance_is_rejected_up_front() {
    let result = PortfolioOptimizer::new(
      array![0.1, 0.12],
      array![[0.04, 0.02], [0.006, 0.09]],
      0.0,
    );

    assert!(matches!(
      result,
      Err(PortfolioError::NotPositiveSemiDefinite(_))
    ));
  }

  #[test]
  fn single_asset_gets_full_allocation() {
    let optimizer = PortfolioOptimizer::new(array![0.07], array![[0.02]], 0.01).unwrap();

    let solved = optimizer.maximize_sharpe().unwrap();
    assert_eq!(solved.weights.to_vec(), vec![1.0]);
  }

  #[test]
  fn weights_validation_rejects_bad_vectors() {
    assert!(Weights::new(array![0.5, 0.6]).is_err());
    assert!(Weights::new(array![1.2, -0.2]).is_err());
    assert!(Weights::new(Array1::zeros(0)).is_err());
    assert!(Weights::new(array![0.25, 0.75]).is_ok());
  }
}
