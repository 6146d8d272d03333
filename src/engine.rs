//! # Forecast Engine
//!
//! High-level orchestration: prices → returns → (mean, covariance) →
//! optional optimization → simulation → risk metrics. The engine returns
//! plain structured data; rendering belongs to the caller.

use impl_new_derive::ImplNew;
use tracing::debug;

use crate::error::PortfolioError;
use crate::error::Result;
use crate::metrics::risk_metrics;
use crate::metrics::RiskMetrics;
use crate::optimizer::PortfolioOptimizer;
use crate::optimizer::Weights;
use crate::returns::annualize_covariance;
use crate::returns::annualize_mean;
use crate::returns::PriceSeries;
use crate::simulation::MonteCarloSimulator;
use crate::simulation::SimulationResult;
use crate::TRADING_DAYS;

/// How the engine obtains its allocation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OptimizationMode {
  /// Solve for the maximum-Sharpe allocation.
  MaximizeSharpe,
  /// Solve for the minimum-volatility allocation at a target annual return.
  MinimizeVolatility { target_return: f64 },
  /// Use the explicit weights supplied in the configuration.
  Manual,
}

/// Runtime configuration for [`ForecastEngine`].
#[derive(Clone, Debug)]
pub struct ForecastConfig {
  /// Annual risk-free rate used by the optimizer.
  pub risk_free: f64,
  /// Allocation strategy.
  pub optimization: OptimizationMode,
  /// Explicit allocation, only consulted in [`OptimizationMode::Manual`].
  pub weights: Option<Weights>,
  /// Starting portfolio value.
  pub initial_capital: f64,
  /// Number of Monte Carlo simulations.
  pub num_simulations: usize,
  /// Simulation horizon in trading periods.
  pub time_horizon: usize,
  /// Base seed for reproducible simulation runs.
  pub seed: Option<u64>,
}

impl Default for ForecastConfig {
  fn default() -> Self {
    Self {
      risk_free: 0.02,
      optimization: OptimizationMode::MaximizeSharpe,
      weights: None,
      initial_capital: 1000.0,
      num_simulations: 10_000,
      time_horizon: 252,
      seed: None,
    }
  }
}

/// Full pipeline output for the presentation layer.
#[derive(Clone, Debug)]
pub struct ForecastReport {
  /// Tickers that survived gap filtering, in weight order.
  pub tickers: Vec<String>,
  /// Allocation the simulation ran with.
  pub weights: Weights,
  /// Simulated value paths and terminal values.
  pub simulation: SimulationResult,
  /// Terminal-distribution statistics.
  pub metrics: RiskMetrics,
}

impl ForecastReport {
  /// Ticker/weight pairs for display.
  pub fn allocations(&self) -> Vec<(String, f64)> {
    self
      .tickers
      .iter()
      .cloned()
      .zip(self.weights.to_vec())
      .collect()
  }
}

/// Single entry point tying the components into one run.
#[derive(ImplNew)]
pub struct ForecastEngine {
  pub config: ForecastConfig,
}

impl ForecastEngine {
  /// Execute the full pipeline over a price series.
  ///
  /// The optimizer sees annualized statistics while the simulator compounds
  /// the periodic ones, so both keep their conventional scales.
  pub fn run(&self, series: &PriceSeries) -> Result<ForecastReport> {
    let returns = series.returns()?;
    let mu = returns.mean()?;
    let cov = returns.covariance()?;
    debug!(assets = returns.tickers.len(), "forecast pipeline started");

    let weights = match self.config.optimization {
      OptimizationMode::Manual => {
        let weights = self.config.weights.clone().ok_or_else(|| {
          PortfolioError::InvalidWeights(
            "manual mode requires explicit weights".to_string(),
          )
        })?;
        if weights.len() != returns.tickers.len() {
          return Err(PortfolioError::InvalidWeights(format!(
            "{} weights for {} assets",
            weights.len(),
            returns.tickers.len()
          )));
        }
        weights
      }
      OptimizationMode::MaximizeSharpe => {
        let optimizer = PortfolioOptimizer::new(
          annualize_mean(&mu, TRADING_DAYS),
          annualize_covariance(&cov, TRADING_DAYS),
          self.config.risk_free,
        )?;
        optimizer.maximize_sharpe()?.weights
      }
      OptimizationMode::MinimizeVolatility { target_return } => {
        let optimizer = PortfolioOptimizer::new(
          annualize_mean(&mu, TRADING_DAYS),
          annualize_covariance(&cov, TRADING_DAYS),
          self.config.risk_free,
        )?;
        optimizer.minimize_volatility(target_return)?.weights
      }
    };

    let simulator = MonteCarloSimulator::new(
      mu,
      cov,
      weights.clone(),
      self.config.initial_capital,
      self.config.num_simulations,
      self.config.time_horizon,
      self.config.seed,
    );
    let simulation = simulator.run()?;
    let metrics = risk_metrics(&simulation.terminal, self.config.initial_capital)?;

    Ok(ForecastReport {
      tickers: returns.tickers,
      weights,
      simulation,
      metrics,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use ndarray::Array2;

  use super::*;

  fn synthetic_series(assets: usize, rows: usize) -> PriceSeries {
    let tickers = (0..assets).map(|i| format!("T{i}")).collect();
    let dates = (0..rows)
      .map(|i| NaiveDate::from_ymd_opt(2023, 1, 2).unwrap() + chrono::Days::new(i as u64))
      .collect();

    // Smooth drifting prices with asset-specific wiggle, no randomness.
    let prices = Array2::from_shape_fn((rows, assets), |(t, i)| {
      let drift = 1.0 + 0.0005 * (i as f64 + 1.0);
      let wiggle = 0.004 * ((t as f64 * 0.7 + i as f64).sin());
      100.0 * (i as f64 + 1.0) * drift.powi(t as i32) * (1.0 + wiggle)
    });

    PriceSeries::new(tickers, dates, prices).unwrap()
  }

  fn quick_config(mode: OptimizationMode) -> ForecastConfig {
    ForecastConfig {
      optimization: mode,
      num_simulations: 200,
      time_horizon: 20,
      seed: Some(11),
      ..ForecastConfig::default()
    }
  }

  #[test]
  fn sharpe_pipeline_produces_consistent_report() {
    let engine = ForecastEngine::new(quick_config(OptimizationMode::MaximizeSharpe));
    let report = engine.run(&synthetic_series(3, 60)).unwrap();

    assert_eq!(report.tickers.len(), 3);
    assert_eq!(report.simulation.paths.dim(), (20, 200));
    assert_eq!(report.simulation.terminal.len(), 200);
    let sum: f64 = report.weights.to_vec().iter().sum();
    assert!((sum - 1.0).abs() < 1e-6);
    assert!(report.metrics.mean.is_finite());
    assert!(report.metrics.prob_loss >= 0.0 && report.metrics.prob_loss <= 1.0);
    assert_eq!(report.allocations().len(), 3);
  }

  #[test]
  fn manual_mode_uses_supplied_weights() {
    let mut config = quick_config(OptimizationMode::Manual);
    config.weights = Some(Weights::equal(3).unwrap());
    let engine = ForecastEngine::new(config);

    let report = engine.run(&synthetic_series(3, 60)).unwrap();
    assert_eq!(report.weights, Weights::equal(3).unwrap());
  }

  #[test]
  fn manual_mode_without_weights_is_rejected() {
    let engine = ForecastEngine::new(quick_config(OptimizationMode::Manual));

    assert!(matches!(
      engine.run(&synthetic_series(2, 40)),
      Err(PortfolioError::InvalidWeights(_))
    ));
  }

  #[test]
  fn manual_mode_with_wrong_arity_is_rejected() {
    let mut config = quick_config(OptimizationMode::Manual);
    config.weights = Some(Weights::equal(4).unwrap());
    let engine = ForecastEngine::new(config);

    assert!(matches!(
      engine.run(&synthetic_series(2, 40)),
      Err(PortfolioError::InvalidWeights(_))
    ));
  }

  #[test]
  fn deterministic_seed_makes_the_report_reproducible() {
    let mut config = quick_config(OptimizationMode::Manual);
    config.weights = Some(Weights::equal(2).unwrap());
    let engine = ForecastEngine::new(config);

    let series = synthetic_series(2, 50);
    let a = engine.run(&series).unwrap();
    let b = engine.run(&series).unwrap();
    assert_eq!(a.simulation.paths, b.simulation.paths);
  }
}
