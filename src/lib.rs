//! # Monte Carlo Portfolio Forecasting
//!
//! `portfolio_mc` turns an aligned price history into a distribution of
//! future portfolio outcomes: prices become periodic returns, returns become
//! mean/covariance estimates, an optional mean-variance optimizer produces
//! long-only weights, and a correlated Monte Carlo simulator compounds
//! thousands of value paths whose terminal distribution is summarized as
//! tail-risk statistics.
//!
//! ## Modules
//!
//! | Module         | Description                                                      |
//! |----------------|------------------------------------------------------------------|
//! | [`returns`]    | Price-to-return conversion, mean/covariance, annualization.      |
//! | [`optimizer`]  | Sharpe-maximizing and volatility-minimizing simplex allocation.  |
//! | [`simulation`] | Correlated multivariate-normal path simulation.                  |
//! | [`metrics`]    | Terminal-distribution risk statistics (VaR, CVaR, loss odds).    |
//! | [`engine`]     | Config-driven orchestration of the full pipeline.                |
//! | [`error`]      | Shared failure taxonomy.                                         |
//!
//! ## Example Usage
//!
//! ```rust
//! use portfolio_mc::engine::{ForecastConfig, ForecastEngine};
//!
//! let engine = ForecastEngine::new(ForecastConfig::default());
//! let report = engine.run(&series)?;
//! println!("P(loss) = {:.1}%", report.metrics.prob_loss * 100.0);
//! ```
//!
//! ## Parallelism
//!
//! The simulation dimension is embarrassingly parallel: each run owns an
//! independently seeded generator and fans out over `rayon`, so fixing the
//! seed reproduces results bit-for-bit regardless of thread scheduling.

pub mod engine;
pub mod error;
pub mod metrics;
pub mod optimizer;
pub mod returns;
pub mod simulation;

pub use crate::error::PortfolioError;
pub use crate::error::Result;
pub use crate::metrics::risk_metrics;
pub use crate::metrics::RiskMetrics;
pub use crate::optimizer::OptimizedPortfolio;
pub use crate::optimizer::PortfolioOptimizer;
pub use crate::optimizer::Weights;
pub use crate::returns::PriceSeries;
pub use crate::simulation::MonteCarloSimulator;
pub use crate::simulation::SimulationResult;

/// Trading periods per year used for the annualization convention.
pub const TRADING_DAYS: f64 = 252.0;
