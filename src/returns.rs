//! # Returns
//!
//! $$
//! r_{t,i} = \frac{p_{t,i}}{p_{t-1,i}} - 1
//! $$
//!
//! Price-to-return conversion and the periodic mean/covariance estimators the
//! optimizer and simulator consume. Annualization is left to the caller via
//! [`annualize_mean`]/[`annualize_covariance`] so the period convention stays
//! explicit.

use chrono::NaiveDate;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::Axis;

use crate::error::PortfolioError;
use crate::error::Result;

/// Aligned per-asset price history, one column per ticker.
///
/// Gaps left behind by failed ticker fetches are encoded as `f64::NAN`; the
/// retrieval layer is responsible for alignment, this type only validates
/// shape agreement.
#[derive(Clone, Debug)]
pub struct PriceSeries {
  tickers: Vec<String>,
  dates: Vec<NaiveDate>,
  prices: Array2<f64>,
}

/// Periodic fractional returns with the ticker labels that survived gap
/// filtering.
#[derive(Clone, Debug)]
pub struct AssetReturns {
  /// Tickers of the retained columns, in column order.
  pub tickers: Vec<String>,
  /// T-1 x N matrix of periodic returns.
  pub values: Array2<f64>,
}

impl PriceSeries {
  /// Validate label/shape agreement and wrap the price table.
  pub fn new(tickers: Vec<String>, dates: Vec<NaiveDate>, prices: Array2<f64>) -> Result<Self> {
    if prices.nrows() == 0 || prices.ncols() == 0 {
      return Err(PortfolioError::EmptyPrices);
    }
    if tickers.len() != prices.ncols() {
      return Err(PortfolioError::MisalignedData {
        message: format!(
          "{} tickers for {} price columns",
          tickers.len(),
          prices.ncols()
        ),
      });
    }
    if dates.len() != prices.nrows() {
      return Err(PortfolioError::MisalignedData {
        message: format!("{} dates for {} price rows", dates.len(), prices.nrows()),
      });
    }

    Ok(Self {
      tickers,
      dates,
      prices,
    })
  }

  /// Tickers in column order.
  pub fn tickers(&self) -> &[String] {
    &self.tickers
  }

  /// Date index in row order.
  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  /// Raw price table.
  pub fn prices(&self) -> &Array2<f64> {
    &self.prices
  }

  /// Convert prices to periodic fractional returns.
  ///
  /// Columns without a single finite price (failed fetches) are dropped with
  /// their labels; afterwards any return row still containing a non-finite
  /// value is dropped as a whole.
  pub fn returns(&self) -> Result<AssetReturns> {
    let t = self.prices.nrows();
    if t < 2 {
      return Err(PortfolioError::InsufficientData {
        required: 2,
        available: t,
      });
    }

    let kept: Vec<usize> = (0..self.prices.ncols())
      .filter(|&j| self.prices.column(j).iter().any(|p| p.is_finite()))
      .collect();
    if kept.is_empty() {
      return Err(PortfolioError::EmptyPrices);
    }

    let mut raw = Array2::<f64>::zeros((t - 1, kept.len()));
    for (c, &j) in kept.iter().enumerate() {
      let col = self.prices.column(j);
      for row in 0..t - 1 {
        raw[[row, c]] = col[row + 1] / col[row] - 1.0;
      }
    }

    let complete: Vec<usize> = (0..raw.nrows())
      .filter(|&row| raw.row(row).iter().all(|r| r.is_finite()))
      .collect();
    if complete.is_empty() {
      return Err(PortfolioError::InsufficientData {
        required: 1,
        available: 0,
      });
    }

    let mut values = Array2::<f64>::zeros((complete.len(), kept.len()));
    for (out, &row) in complete.iter().enumerate() {
      values.row_mut(out).assign(&raw.row(row));
    }

    let tickers = kept.iter().map(|&j| self.tickers[j].clone()).collect();
    Ok(AssetReturns { tickers, values })
  }
}

impl AssetReturns {
  /// Column means of the returns matrix.
  pub fn mean(&self) -> Result<Array1<f64>> {
    mean_returns(&self.values)
  }

  /// Sample covariance of the returns matrix.
  pub fn covariance(&self) -> Result<Array2<f64>> {
    sample_covariance(&self.values)
  }
}

/// Per-asset mean of a T x N returns matrix.
pub fn mean_returns(returns: &Array2<f64>) -> Result<Array1<f64>> {
  returns
    .mean_axis(Axis(0))
    .ok_or(PortfolioError::InsufficientData {
      required: 1,
      available: 0,
    })
}

/// Sample covariance (N-1 denominator) of a T x N returns matrix.
pub fn sample_covariance(returns: &Array2<f64>) -> Result<Array2<f64>> {
  let t = returns.nrows();
  if t < 2 {
    return Err(PortfolioError::InsufficientData {
      required: 2,
      available: t,
    });
  }

  let mu = mean_returns(returns)?;
  let centered = returns - &mu;
  Ok(centered.t().dot(&centered) / (t as f64 - 1.0))
}

/// Scale a periodic mean vector to a yearly convention.
pub fn annualize_mean(mu: &Array1<f64>, periods_per_year: f64) -> Array1<f64> {
  mu * periods_per_year
}

/// Scale a periodic covariance matrix to a yearly convention.
pub fn annualize_covariance(cov: &Array2<f64>, periods_per_year: f64) -> Array2<f64> {
  cov * periods_per_year
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use ndarray::array;

  use super::*;
  use crate::TRADING_DAYS;

  fn dates(n: usize) -> Vec<NaiveDate> {
    (0..n)
      .map(|i| NaiveDate::from_ymd_opt(2020, 1, 1).unwrap() + chrono::Days::new(i as u64))
      .collect()
  }

  fn two_asset_series() -> PriceSeries {
    PriceSeries::new(
      vec!["AAPL".to_string(), "MSFT".to_string()],
      dates(4),
      array![
        [150.0, 210.0],
        [152.0, 212.0],
        [154.0, 215.0],
        [153.0, 213.0]
      ],
    )
    .unwrap()
  }

  #[test]
  fn two_assets_four_prices_give_3x2_returns() {
    let returns = two_asset_series().returns().unwrap();

    assert_eq!(returns.values.dim(), (3, 2));
    assert_eq!(returns.tickers, vec!["AAPL", "MSFT"]);
    assert_abs_diff_eq!(returns.values[[0, 0]], 2.0 / 150.0, epsilon = 1e-12);
    assert_abs_diff_eq!(returns.values[[2, 1]], 213.0 / 215.0 - 1.0, epsilon = 1e-12);
  }

  #[test]
  fn flat_prices_give_zero_returns() {
    let series = PriceSeries::new(
      vec!["X".to_string()],
      dates(5),
      Array2::from_elem((5, 1), 42.0),
    )
    .unwrap();

    let returns = series.returns().unwrap();
    assert!(returns.values.iter().all(|&r| r == 0.0));
  }

  #[test]
  fn single_row_is_insufficient() {
    let series = PriceSeries::new(
      vec!["X".to_string()],
      dates(1),
      Array2::from_elem((1, 1), 100.0),
    )
    .unwrap();

    assert!(matches!(
      series.returns(),
      Err(PortfolioError::InsufficientData { required: 2, .. })
    ));
  }

  #[test]
  fn misaligned_labels_are_rejected() {
    let result = PriceSeries::new(
      vec!["X".to_string(), "Y".to_string()],
      dates(3),
      Array2::from_elem((3, 1), 100.0),
    );

    assert!(matches!(
      result,
      Err(PortfolioError::MisalignedData { .. })
    ));
  }

  #[test]
  fn all_nan_column_is_dropped_with_its_label() {
    let mut prices = Array2::from_elem((4, 2), f64::NAN);
    for (i, p) in [100.0, 101.0, 102.0, 103.0].iter().enumerate() {
      prices[[i, 0]] = *p;
    }
    let series = PriceSeries::new(
      vec!["OK".to_string(), "DEAD".to_string()],
      dates(4),
      prices,
    )
    .unwrap();

    let returns = series.returns().unwrap();
    assert_eq!(returns.tickers, vec!["OK"]);
    assert_eq!(returns.values.dim(), (3, 1));
  }

  #[test]
  fn row_with_gap_is_dropped() {
    let series = PriceSeries::new(
      vec!["A".to_string(), "B".to_string()],
      dates(4),
      array![
        [100.0, 50.0],
        [101.0, f64::NAN],
        [102.0, 52.0],
        [103.0, 53.0]
      ],
    )
    .unwrap();

    // The NaN price poisons the two adjacent return rows.
    let returns = series.returns().unwrap();
    assert_eq!(returns.values.dim(), (1, 2));
    assert_abs_diff_eq!(returns.values[[0, 0]], 103.0 / 102.0 - 1.0, epsilon = 1e-12);
  }

  #[test]
  fn sample_covariance_uses_n_minus_one() {
    let returns = array![[0.01, 0.02], [0.03, -0.01], [-0.02, 0.04]];
    let cov = sample_covariance(&returns).unwrap();

    let mu = mean_returns(&returns).unwrap();
    let mut expected = 0.0;
    for t in 0..3 {
      expected += (returns[[t, 0]] - mu[0]) * (returns[[t, 1]] - mu[1]);
    }
    expected /= 2.0;

    assert_abs_diff_eq!(cov[[0, 1]], expected, epsilon = 1e-15);
    assert_abs_diff_eq!(cov[[0, 1]], cov[[1, 0]], epsilon = 1e-15);
    assert!(cov[[0, 0]] >= 0.0 && cov[[1, 1]] >= 0.0);
  }

  #[test]
  fn annualization_scales_by_trading_days() {
    let mu = array![0.001, 0.002];
    let cov = array![[0.0001, 0.00002], [0.00002, 0.0004]];

    let mu_a = annualize_mean(&mu, TRADING_DAYS);
    let cov_a = annualize_covariance(&cov, TRADING_DAYS);

    assert_abs_diff_eq!(mu_a[0], 0.252, epsilon = 1e-12);
    assert_abs_diff_eq!(cov_a[[1, 1]], 0.1008, epsilon = 1e-12);
  }
}
