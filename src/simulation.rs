//! # Monte Carlo Simulation
//!
//! $$
//! V_t = V_0\,\mathbf{w}^\top \prod_{s\le t}(1+\mathbf{r}_s),\quad
//! \mathbf{r}_s\sim\mathcal N(\mu,\Sigma)
//! $$
//!
//! Correlated multivariate-normal path simulation. Each draw transforms
//! independent standard normals through a lower Cholesky factor of the
//! covariance; each simulation owns an independently seeded generator so the
//! S-dimension parallelizes without shared state.

use impl_new_derive::ImplNew;
use nalgebra::DMatrix;
use ndarray::Array1;
use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use rand_distr::Normal;
use rayon::prelude::*;
use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::optimizer::Weights;

/// Pivot/symmetry tolerance relative to the covariance scale.
const PSD_TOL: f64 = 1e-10;

/// Simulated portfolio value paths, treated as immutable once computed.
#[derive(Clone, Debug)]
pub struct SimulationResult {
  /// T x S matrix of cumulative portfolio values, one column per simulation.
  pub paths: Array2<f64>,
  /// Length-S terminal values, equal to the last row of `paths`.
  pub terminal: Array1<f64>,
}

/// Monte Carlo simulator over a fixed mean/covariance/weights triple.
///
/// `run` materializes the full T x S path matrix (O(T*S) memory, intended
/// for path plotting); `run_terminal` streams each simulation and keeps only
/// its terminal value, so memory stays O(N) per worker when only terminal
/// statistics are needed. The caller chooses the trade-off.
#[derive(ImplNew)]
pub struct MonteCarloSimulator {
  /// Periodic expected returns, length N.
  pub mu: Array1<f64>,
  /// Periodic covariance, N x N, symmetric PSD.
  pub cov: Array2<f64>,
  /// Long-only allocation projected onto every path step.
  pub weights: Weights,
  /// Starting portfolio value, strictly positive.
  pub initial_capital: f64,
  /// Number of independent simulations S.
  pub num_simulations: usize,
  /// Number of time steps T per simulation.
  pub time_horizon: usize,
  /// Base seed for reproducible runs; `None` draws a fresh one from the
  /// thread generator, so repeated runs differ.
  pub seed: Option<u64>,
}

impl MonteCarloSimulator {
  /// Run all simulations and collect the full path matrix.
  pub fn run(&self) -> Result<SimulationResult> {
    self.validate()?;
    let l = psd_lower_cholesky(&self.cov)?;
    let base = self.base_seed();
    debug!(
      num_simulations = self.num_simulations,
      time_horizon = self.time_horizon,
      "running monte carlo path simulation"
    );

    let columns: Vec<Array1<f64>> = (0..self.num_simulations)
      .into_par_iter()
      .map(|sim| self.simulate_path(&l, mix_seed(base, sim as u64)))
      .collect();

    let mut paths = Array2::<f64>::zeros((self.time_horizon, self.num_simulations));
    for (sim, column) in columns.iter().enumerate() {
      paths.column_mut(sim).assign(column);
    }
    let terminal = paths.row(self.time_horizon - 1).to_owned();

    Ok(SimulationResult { paths, terminal })
  }

  /// Run all simulations keeping only terminal values.
  ///
  /// Seeding matches [`MonteCarloSimulator::run`], so the result equals the
  /// terminal row of the full path matrix for the same seed.
  pub fn run_terminal(&self) -> Result<Array1<f64>> {
    self.validate()?;
    let l = psd_lower_cholesky(&self.cov)?;
    let base = self.base_seed();
    debug!(
      num_simulations = self.num_simulations,
      "running monte carlo terminal simulation"
    );

    let terminal: Vec<f64> = (0..self.num_simulations)
      .into_par_iter()
      .map(|sim| self.simulate_terminal(&l, mix_seed(base, sim as u64)))
      .collect();

    Ok(Array1::from(terminal))
  }

  fn validate(&self) -> Result<()> {
    let n = self.mu.len();
    if n == 0 {
      return Err(PortfolioError::InvalidParameter(
        "expected returns vector is empty".to_string(),
      ));
    }
    if self.cov.nrows() != n || self.cov.ncols() != n {
      return Err(PortfolioError::CovarianceShape {
        expected: n,
        rows: self.cov.nrows(),
        cols: self.cov.ncols(),
      });
    }
    if self.weights.len() != n {
      return Err(PortfolioError::InvalidWeights(format!(
        "{} weights for {} assets",
        self.weights.len(),
        n
      )));
    }
    if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
      return Err(PortfolioError::InvalidParameter(format!(
        "initial capital must be positive, got {}",
        self.initial_capital
      )));
    }
    if self.num_simulations == 0 {
      return Err(PortfolioError::InvalidParameter(
        "number of simulations must be at least 1".to_string(),
      ));
    }
    if self.time_horizon == 0 {
      return Err(PortfolioError::InvalidParameter(
        "time horizon must be at least 1".to_string(),
      ));
    }

    Ok(())
  }

  fn base_seed(&self) -> u64 {
    self.seed.unwrap_or_else(|| rand::thread_rng().gen())
  }

  /// One full value path: draw T correlated return vectors, compound each
  /// asset, project through the weights at every step.
  fn simulate_path(&self, l: &Array2<f64>, seed: u64) -> Array1<f64> {
    let n = self.mu.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let standard = Normal::new(0.0, 1.0).unwrap();
    let w = self.weights.as_array();

    let mut growth = Array1::<f64>::ones(n);
    let mut path = Array1::<f64>::zeros(self.time_horizon);
    for step in 0..self.time_horizon {
      let z = Array1::random_using(n, standard, &mut rng);
      let returns = l.dot(&z) + &self.mu;
      growth *= &(returns + 1.0);
      path[step] = growth.dot(w) * self.initial_capital;
    }

    path
  }

  fn simulate_terminal(&self, l: &Array2<f64>, seed: u64) -> f64 {
    let n = self.mu.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let standard = Normal::new(0.0, 1.0).unwrap();

    let mut growth = Array1::<f64>::ones(n);
    for _ in 0..self.time_horizon {
      let z = Array1::random_using(n, standard, &mut rng);
      let returns = l.dot(&z) + &self.mu;
      growth *= &(returns + 1.0);
    }

    growth.dot(self.weights.as_array()) * self.initial_capital
  }
}

/// Lower Cholesky factor of a symmetric PSD matrix.
///
/// Strictly positive-definite input takes the nalgebra fast path. Otherwise
/// an outer-product factorization runs with a pivot tolerance: pivots within
/// tolerance of zero collapse their column (rank-deficient directions sample
/// deterministically), while a negative pivot or an asymmetric input rejects
/// the matrix.
pub(crate) fn psd_lower_cholesky(cov: &Array2<f64>) -> Result<Array2<f64>> {
  let n = cov.nrows();
  let scale = cov
    .diag()
    .iter()
    .fold(1.0_f64, |acc, d| acc.max(d.abs()));
  let tol = scale * PSD_TOL;

  for i in 0..n {
    for j in 0..i {
      if (cov[[i, j]] - cov[[j, i]]).abs() > tol {
        return Err(PortfolioError::NotPositiveSemiDefinite(format!(
          "matrix is not symmetric at ({i}, {j})"
        )));
      }
    }
    if cov[[i, i]] < -tol {
      return Err(PortfolioError::NotPositiveSemiDefinite(format!(
        "negative variance {} on the diagonal",
        cov[[i, i]]
      )));
    }
  }

  let dense = DMatrix::from_fn(n, n, |i, j| cov[[i, j]]);
  if let Some(chol) = dense.cholesky() {
    let l = chol.l();
    return Ok(Array2::from_shape_fn((n, n), |(i, j)| l[(i, j)]));
  }

  let mut l = Array2::<f64>::zeros((n, n));
  for j in 0..n {
    let mut pivot = cov[[j, j]];
    for k in 0..j {
      pivot -= l[[j, k]] * l[[j, k]];
    }

    if pivot > tol {
      l[[j, j]] = pivot.sqrt();
      for i in j + 1..n {
        let mut value = cov[[i, j]];
        for k in 0..j {
          value -= l[[i, k]] * l[[j, k]];
        }
        l[[i, j]] = value / l[[j, j]];
      }
    } else if pivot >= -tol {
      // Zero pivot: a PSD matrix must have a vanishing column residual here.
      for i in j + 1..n {
        let mut value = cov[[i, j]];
        for k in 0..j {
          value -= l[[i, k]] * l[[j, k]];
        }
        if value.abs() > tol {
          return Err(PortfolioError::NotPositiveSemiDefinite(format!(
            "nonzero residual {value} under zero pivot at column {j}"
          )));
        }
      }
    } else {
      return Err(PortfolioError::NotPositiveSemiDefinite(format!(
        "negative pivot {pivot} at column {j}"
      )));
    }
  }

  Ok(l)
}

/// SplitMix64-style mixing of the base seed and simulation index, so every
/// simulation owns an independent stream regardless of thread scheduling.
fn mix_seed(base: u64, index: u64) -> u64 {
  let mut z = base.wrapping_add(0x9E37_79B9_7F4A_7C15_u64.wrapping_mul(index.wrapping_add(1)));
  z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
  z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
  z ^ (z >> 31)
}
